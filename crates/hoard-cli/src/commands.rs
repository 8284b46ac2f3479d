use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use hoard_client::{ClientAuth, HaveCache, HoardClient};
use hoard_index::Index;
use hoard_kv::{FileKv, SortedKv};
use hoard_schema::{ClaimType, Signer};
use hoard_server::{HoardServer, ServerConfig, ServerState};
use hoard_store::{BlobStore, LocalDiskStore};
use hoard_sync::SyncHandler;
use hoard_types::{BlobRef, CancelToken};

use crate::cli::{Cli, Command, PutWhat};

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Command::Init(args) => init(&args.out),
        Command::Serve(args) => serve(cli.secret_keyring.as_deref(), args),
        Command::Sync(args) => sync(args),
        Command::Reindex(args) => reindex(args),
        // The rest talk to a server.
        _ => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(client_command(&cli))
        }
    }
}

fn init(out: &str) -> anyhow::Result<()> {
    if Path::new(out).exists() {
        bail!("refusing to overwrite existing keyring {out}");
    }
    let signer = Signer::generate();
    std::fs::write(out, format!("{}\n", signer.secret_hex()))
        .with_context(|| format!("writing {out}"))?;
    println!("wrote keyring {out}");
    println!("public key ref: {}", signer.public_key_ref());
    Ok(())
}

fn open_storage(root: &str) -> anyhow::Result<(Arc<LocalDiskStore>, Arc<Index>)> {
    let root = Path::new(root);
    let store = Arc::new(LocalDiskStore::open(root.join("blobs"))?);
    let kv: Arc<dyn SortedKv> = Arc::new(FileKv::open(root.join("index.kv"))?);
    let index = Arc::new(Index::open(kv)?);
    index.set_blob_source(Arc::clone(&store) as Arc<dyn BlobStore>);
    Ok((store, index))
}

fn load_signer(cli_path: Option<&str>) -> anyhow::Result<Option<Signer>> {
    let path = cli_path
        .map(str::to_string)
        .or_else(|| std::env::var("CAMLI_SECRET_RING").ok());
    let Some(path) = path else {
        return Ok(None);
    };
    let contents =
        std::fs::read_to_string(&path).with_context(|| format!("reading keyring {path}"))?;
    Ok(Some(Signer::from_secret_hex(&contents)?))
}

fn serve(keyring: Option<&str>, args: &crate::cli::ServeArgs) -> anyhow::Result<()> {
    let (store, index) = open_storage(&args.root)?;
    index.attach_corpus()?;
    let signer = load_signer(keyring)?.map(Arc::new);

    // The owner key must be fetchable for claim verification.
    if let Some(signer) = &signer {
        let key_bytes = signer.public_key_blob().as_bytes();
        hoard_store::receive_bytes(store.as_ref(), key_bytes)?;
    }

    let mut config = ServerConfig::default().with_auth_from_env();
    config.bind_addr = args.bind.parse().context("bad --bind address")?;
    config.owner_name = args.owner_name.clone();

    let state = ServerState::new(
        Arc::clone(&store) as Arc<dyn BlobStore>,
        index,
        signer,
        config,
    );
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(HoardServer::new(state).serve())?;
    Ok(())
}

fn sync(args: &crate::cli::SyncArgs) -> anyhow::Result<()> {
    let src = Arc::new(LocalDiskStore::open(Path::new(&args.src).join("blobs"))?);
    let dst_root = Path::new(&args.dst);
    let dst = Arc::new(LocalDiskStore::open(dst_root.join("blobs"))?);
    let checkpoint: Arc<dyn SortedKv> = Arc::new(FileKv::open(dst_root.join("sync.kv"))?);

    let handler = SyncHandler::new(
        format!("{}->{}", args.src, args.dst),
        src as Arc<dyn BlobStore>,
        dst as Arc<dyn BlobStore>,
        checkpoint,
    );
    let report = handler.run_once(&CancelToken::new())?;
    println!(
        "copied {} blobs ({} bytes), {} already present",
        report.blobs_copied, report.bytes_copied, report.already_present
    );
    Ok(())
}

fn reindex(args: &crate::cli::ReindexArgs) -> anyhow::Result<()> {
    let (_store, index) = open_storage(&args.root)?;
    let start = std::env::var("CAMLI_REINDEX_START")
        .ok()
        .and_then(|s| BlobRef::parse_opt(&s));
    let n = index.reindex(start, CancelToken::new())?;
    println!("reindexed {n} blobs");
    Ok(())
}

async fn make_client(cli: &Cli) -> anyhow::Result<HoardClient> {
    let server = cli
        .server
        .clone()
        .or_else(|| std::env::var("CAMLI_SERVER").ok())
        .context("no server: pass --server or set CAMLI_SERVER")?;
    let auth = std::env::var("CAMLI_AUTH")
        .ok()
        .and_then(|s| ClientAuth::parse(&s))
        .unwrap_or_default();
    let client = HoardClient::new(server, auth)?;
    // Best effort: key the have-cache to the server generation.
    match client.storage_generation().await {
        Ok(generation) => Ok(client
            .with_have_cache(HaveCache::new(Box::new(hoard_kv::MemoryKv::new()), generation))),
        Err(_) => Ok(client),
    }
}

fn require_signer(cli: &Cli) -> anyhow::Result<Signer> {
    load_signer(cli.secret_keyring.as_deref())?
        .context("no keyring: pass --secret-keyring or set CAMLI_SECRET_RING")
}

async fn client_command(cli: &Cli) -> anyhow::Result<()> {
    let client = make_client(cli).await?;
    match &cli.command {
        Command::Put(args) => match &args.what {
            PutWhat::Blob { path } => {
                let data = std::fs::read(path).with_context(|| format!("reading {path}"))?;
                let result = client.put_blob(&data).await?;
                println!("{}", result.blob_ref);
            }
            PutWhat::File { path } => {
                let data = std::fs::read(path).with_context(|| format!("reading {path}"))?;
                let name = Path::new(path)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or(path);
                let root = client.upload_file(name, &data).await?;
                println!("{root}");
            }
        },
        Command::Get(args) => {
            let br = BlobRef::parse(&args.blobref)?;
            let data = if args.contents {
                client.download_file(&br).await?
            } else {
                client.fetch(&br).await?
            };
            match &args.output {
                Some(path) => std::fs::write(path, &data)?,
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&data)?;
                }
            }
        }
        Command::Permanode(_) => {
            let signer = require_signer(cli)?;
            let pn = client.create_permanode(&signer).await?;
            println!("{pn}");
        }
        Command::Attr(args) => {
            let signer = require_signer(cli)?;
            let pn = BlobRef::parse(&args.permanode)?;
            let claim_type = match (args.add, args.del) {
                (false, false) => ClaimType::SetAttribute,
                (true, false) => ClaimType::AddAttribute,
                (false, true) => ClaimType::DelAttribute,
                (true, true) => bail!("--add and --del are mutually exclusive"),
            };
            let value = args.value.clone().unwrap_or_default();
            let claim = client
                .upload_attribute_claim(&signer, &pn, claim_type, &args.attr, &value)
                .await?;
            println!("{claim}");
        }
        Command::Delete(args) => {
            let signer = require_signer(cli)?;
            let target = BlobRef::parse(&args.target)?;
            let claim = client.upload_delete_claim(&signer, &target).await?;
            println!("{claim}");
        }
        Command::Search(args) => {
            let expression = args.expression.join(" ");
            let results = client.search(&expression).await?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Command::Describe(args) => {
            let br = BlobRef::parse(&args.blobref)?;
            let description = client.describe(&br, args.depth).await?;
            println!("{}", serde_json::to_string_pretty(&description)?);
        }
        Command::Init(_) | Command::Serve(_) | Command::Sync(_) | Command::Reindex(_) => {
            unreachable!("handled in run_command")
        }
    }
    Ok(())
}
