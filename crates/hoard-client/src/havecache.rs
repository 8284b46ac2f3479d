use hoard_kv::SortedKv;
use hoard_types::BlobRef;

/// Local record of refs known to exist on a server, keyed by the server's
/// storage generation so a wiped server invalidates the cache naturally.
///
/// Append-only in the happy path; concurrent writers are safe because the
/// backing KV serializes mutations.
pub struct HaveCache {
    kv: Box<dyn SortedKv>,
    generation: String,
}

impl HaveCache {
    pub fn new(kv: Box<dyn SortedKv>, generation: impl Into<String>) -> Self {
        Self {
            kv,
            generation: generation.into(),
        }
    }

    fn key(&self, br: &BlobRef) -> String {
        format!("have|{}|{br}", self.generation)
    }

    /// Whether the server was known to have `br` at this generation.
    pub fn has(&self, br: &BlobRef) -> bool {
        self.kv.get(&self.key(br)).ok().flatten().is_some()
    }

    /// Record that the server has `br`.
    pub fn note(&self, br: &BlobRef, size: u64) {
        if let Err(e) = self.kv.set(&self.key(br), &size.to_string()) {
            tracing::warn!(blob = %br, "have-cache write failed: {e}");
        }
    }
}
