use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use hoard_types::{BlobRef, CancelToken, Hasher, SizedBlobRef};
use rand::RngCore;
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::tee::TeeWriter;
use crate::traits::{BlobIter, BlobStore, Generation, MAX_BLOB_SIZE};

const GENERATION_FILE: &str = "generation.dat";
const TMP_DIR: &str = "tmp";

/// Blob store over a local directory tree.
///
/// Blobs are sharded two levels deep by digest prefix:
/// `<root>/<algo>/xx/yy/<algo>-<digest>.dat`. Receives write to a temp
/// file under `<root>/tmp` while hashing and rename into place only after
/// the digest checks out, so a partially written blob is never visible.
pub struct LocalDiskStore {
    root: PathBuf,
}

impl LocalDiskStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(TMP_DIR))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, br: &BlobRef) -> PathBuf {
        let hex = br.hex();
        self.root
            .join(br.algo().name())
            .join(&hex[..2])
            .join(&hex[2..4])
            .join(format!("{br}.dat"))
    }

    /// Delete the generation record so the next call to `generation`
    /// mints a fresh one. Called after a wipe.
    pub fn reset_generation(&self) -> StoreResult<()> {
        let path = self.root.join(GENERATION_FILE);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn walk_sorted(&self) -> StoreResult<Vec<SizedBlobRef>> {
        let mut out = Vec::new();
        for algo_dir in sorted_dirs(&self.root)? {
            if algo_dir.file_name() == Some(std::ffi::OsStr::new(TMP_DIR)) {
                continue;
            }
            for shard1 in sorted_dirs(&algo_dir)? {
                for shard2 in sorted_dirs(&shard1)? {
                    let mut files: Vec<PathBuf> = fs::read_dir(&shard2)?
                        .filter_map(|e| e.ok().map(|e| e.path()))
                        .filter(|p| p.extension() == Some(std::ffi::OsStr::new("dat")))
                        .collect();
                    files.sort();
                    for file in files {
                        let stem = match file.file_stem().and_then(|s| s.to_str()) {
                            Some(s) => s,
                            None => continue,
                        };
                        let Some(br) = BlobRef::parse_opt(stem) else {
                            warn!(path = %file.display(), "skipping non-blob file in store");
                            continue;
                        };
                        let size = fs::metadata(&file)?.len();
                        out.push(br.sized(size));
                    }
                }
            }
        }
        Ok(out)
    }
}

fn sorted_dirs(dir: &Path) -> StoreResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut dirs: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

impl BlobStore for LocalDiskStore {
    fn receive(&self, br: &BlobRef, source: &mut dyn Read) -> StoreResult<SizedBlobRef> {
        let mut tmp = tempfile::NamedTempFile::new_in(self.root.join(TMP_DIR))?;
        let mut hasher = Hasher::new(br.algo());
        {
            let mut tee = TeeWriter::new(&mut hasher, &mut tmp);
            let mut limited = source.take(MAX_BLOB_SIZE + 1);
            std::io::copy(&mut limited, &mut tee)?;
        }
        let written = hasher.written();
        if written > MAX_BLOB_SIZE {
            return Err(StoreError::TooLarge { max: MAX_BLOB_SIZE });
        }
        let actual = hasher.finish();
        if actual != *br {
            return Err(StoreError::Corrupt {
                claimed: br.clone(),
                actual,
            });
        }
        tmp.flush()?;
        let path = self.blob_path(br);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;
        Ok(br.clone().sized(written))
    }

    fn stat(&self, refs: &[BlobRef]) -> StoreResult<Vec<SizedBlobRef>> {
        let mut out = Vec::new();
        for br in refs {
            match fs::metadata(self.blob_path(br)) {
                Ok(meta) => out.push(br.clone().sized(meta.len())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(out)
    }

    fn fetch(&self, br: &BlobRef) -> StoreResult<(Box<dyn Read + Send>, u64)> {
        let path = self.blob_path(br);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(br.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        let size = file.metadata()?.len();
        Ok((Box::new(file), size))
    }

    fn enumerate(&self, after: &str, cancel: CancelToken) -> StoreResult<BlobIter<'_>> {
        let after = after.to_string();
        let all = self.walk_sorted()?;
        Ok(Box::new(
            all.into_iter()
                .filter(move |sb| sb.blob_ref.to_string() > after)
                .map(move |sb| {
                    if cancel.is_canceled() {
                        Err(StoreError::Canceled)
                    } else {
                        Ok(sb)
                    }
                }),
        ))
    }

    fn remove(&self, refs: &[BlobRef]) -> StoreResult<()> {
        for br in refs {
            match fs::remove_file(self.blob_path(br)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn can_remove(&self) -> bool {
        true
    }

    fn generation(&self) -> StoreResult<Generation> {
        let path = self.root.join(GENERATION_FILE);
        if let Ok(contents) = fs::read_to_string(&path) {
            if let Some((secs, random)) = contents.trim().split_once('|') {
                if let (Ok(secs), false) = (secs.parse::<i64>(), random.is_empty()) {
                    if let Some(init_time) = DateTime::<Utc>::from_timestamp(secs, 0) {
                        return Ok(Generation {
                            init_time,
                            random: random.to_string(),
                        });
                    }
                }
            }
            warn!(path = %path.display(), "malformed generation file; regenerating");
        }
        let mut randbuf = [0u8; 10];
        rand::thread_rng().fill_bytes(&mut randbuf);
        let generation = Generation {
            init_time: Utc::now(),
            random: hex::encode(randbuf),
        };
        fs::write(
            &path,
            format!("{}|{}", generation.init_time.timestamp(), generation.random),
        )?;
        Ok(generation)
    }
}
