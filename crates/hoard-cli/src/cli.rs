use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "hoard",
    about = "hoard — a personal content-addressed object store",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Server base URL (or CAMLI_SERVER).
    #[arg(long, global = true)]
    pub server: Option<String>,

    /// Secret keyring file (or CAMLI_SECRET_RING).
    #[arg(long = "secret-keyring", global = true)]
    pub secret_keyring: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a signing identity
    Init(InitArgs),
    /// Run the blob server
    Serve(ServeArgs),
    /// Upload a blob or a chunked file
    Put(PutArgs),
    /// Download a blob
    Get(GetArgs),
    /// Create a new permanode
    Permanode(PermanodeArgs),
    /// Set, add, or delete a permanode attribute
    Attr(AttrArgs),
    /// Upload a delete claim against a blob
    Delete(DeleteArgs),
    /// Run a search expression
    Search(SearchArgs),
    /// Describe a blob
    Describe(DescribeArgs),
    /// Replicate blobs between two local stores
    Sync(SyncArgs),
    /// Wipe and rebuild the index of a local store
    Reindex(ReindexArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// Where to write the keyring
    #[arg(long, default_value = "hoard-identity.key")]
    pub out: String,
}

#[derive(Args)]
pub struct ServeArgs {
    #[arg(long, default_value = "127.0.0.1:3179")]
    pub bind: String,
    /// Storage root directory
    #[arg(long, default_value = ".")]
    pub root: String,
    #[arg(long, default_value = "")]
    pub owner_name: String,
}

#[derive(Args)]
pub struct PutArgs {
    #[command(subcommand)]
    pub what: PutWhat,
}

#[derive(Subcommand)]
pub enum PutWhat {
    /// Upload file contents as a single raw blob
    Blob { path: String },
    /// Upload a file through the chunking tree builder
    File { path: String },
}

#[derive(Args)]
pub struct GetArgs {
    pub blobref: String,
    /// Write to this path instead of stdout
    #[arg(short, long)]
    pub output: Option<String>,
    /// Treat the ref as a file schema blob and download its contents
    #[arg(long)]
    pub contents: bool,
}

#[derive(Args)]
pub struct PermanodeArgs {}

#[derive(Args)]
pub struct AttrArgs {
    pub permanode: String,
    pub attr: String,
    pub value: Option<String>,
    /// add-attribute instead of set-attribute
    #[arg(long)]
    pub add: bool,
    /// del-attribute instead of set-attribute
    #[arg(long)]
    pub del: bool,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub target: String,
}

#[derive(Args)]
pub struct SearchArgs {
    pub expression: Vec<String>,
}

#[derive(Args)]
pub struct DescribeArgs {
    pub blobref: String,
    #[arg(long, default_value = "4")]
    pub depth: usize,
}

#[derive(Args)]
pub struct SyncArgs {
    /// Source storage root
    pub src: String,
    /// Destination storage root
    pub dst: String,
}

#[derive(Args)]
pub struct ReindexArgs {
    /// Storage root directory
    #[arg(long, default_value = ".")]
    pub root: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_serve() {
        let cli = Cli::try_parse_from(["hoard", "serve", "--bind", "0.0.0.0:3179"]).unwrap();
        if let Command::Serve(args) = cli.command {
            assert_eq!(args.bind, "0.0.0.0:3179");
            assert_eq!(args.root, ".");
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_put_file() {
        let cli = Cli::try_parse_from(["hoard", "put", "file", "photo.jpg"]).unwrap();
        if let Command::Put(args) = cli.command {
            assert!(matches!(args.what, PutWhat::File { .. }));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_attr_add() {
        let cli = Cli::try_parse_from(["hoard", "attr", "--add", "sha1-aaaa", "tag", "x"]).unwrap();
        if let Command::Attr(args) = cli.command {
            assert!(args.add);
            assert!(!args.del);
            assert_eq!(args.attr, "tag");
            assert_eq!(args.value, Some("x".into()));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_get_with_output() {
        let cli = Cli::try_parse_from(["hoard", "get", "sha1-abcd", "-o", "out.bin"]).unwrap();
        if let Command::Get(args) = cli.command {
            assert_eq!(args.output, Some("out.bin".into()));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_global_server_flag() {
        let cli =
            Cli::try_parse_from(["hoard", "--server", "http://h:3179", "permanode"]).unwrap();
        assert_eq!(cli.server, Some("http://h:3179".into()));
    }

    #[test]
    fn parse_sync() {
        let cli = Cli::try_parse_from(["hoard", "sync", "/a", "/b"]).unwrap();
        if let Command::Sync(args) = cli.command {
            assert_eq!(args.src, "/a");
            assert_eq!(args.dst, "/b");
        } else {
            panic!("wrong command");
        }
    }
}
