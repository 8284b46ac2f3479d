use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::Digest;

use crate::error::TypeError;

/// Digest algorithms a [`BlobRef`] can name.
///
/// `sha1` is the primary algorithm; the others are accepted on parse so
/// foreign refs survive round-trips through the index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HashAlgo {
    Sha1,
    Sha224,
    Sha256,
}

impl HashAlgo {
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgo::Sha1 => "sha1",
            HashAlgo::Sha224 => "sha224",
            HashAlgo::Sha256 => "sha256",
        }
    }

    pub fn digest_len(&self) -> usize {
        match self {
            HashAlgo::Sha1 => 20,
            HashAlgo::Sha224 => 28,
            HashAlgo::Sha256 => 32,
        }
    }

    pub fn from_name(name: &str) -> Result<Self, TypeError> {
        match name {
            "sha1" => Ok(HashAlgo::Sha1),
            "sha224" => Ok(HashAlgo::Sha224),
            "sha256" => Ok(HashAlgo::Sha256),
            other => Err(TypeError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Content-addressed identifier: digest algorithm plus lowercase hex digest.
///
/// The total order over refs is the lexicographic order of the formatted
/// `<algo>-<hex>` string, which enumeration and the index key space rely on.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BlobRef {
    algo: HashAlgo,
    digest: Box<[u8]>,
}

impl BlobRef {
    /// Compute the ref of `data` under `algo`.
    pub fn of_bytes(algo: HashAlgo, data: &[u8]) -> Self {
        let mut h = Hasher::new(algo);
        h.update(data);
        h.finish()
    }

    /// Compute the sha1 ref of `data`. The system default.
    pub fn sha1_of(data: &[u8]) -> Self {
        Self::of_bytes(HashAlgo::Sha1, data)
    }

    /// Build a ref from a pre-computed digest.
    pub fn from_digest(algo: HashAlgo, digest: Vec<u8>) -> Result<Self, TypeError> {
        if digest.len() != algo.digest_len() {
            return Err(TypeError::InvalidLength {
                expected: algo.digest_len(),
                actual: digest.len(),
            });
        }
        Ok(Self {
            algo,
            digest: digest.into_boxed_slice(),
        })
    }

    /// Parse a `<algo>-<lowerhex>` string.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let (name, hex_digest) = s
            .split_once('-')
            .ok_or_else(|| TypeError::MalformedRef(s.to_string()))?;
        let algo = HashAlgo::from_name(name)?;
        if hex_digest.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(TypeError::MalformedRef(s.to_string()));
        }
        let digest = hex::decode(hex_digest).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
        Self::from_digest(algo, digest)
    }

    /// Parse, returning `None` instead of an error. Handy in index row
    /// decoding where malformed rows are skipped, not fatal.
    pub fn parse_opt(s: &str) -> Option<Self> {
        Self::parse(s).ok()
    }

    pub fn algo(&self) -> HashAlgo {
        self.algo
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Hex digest without the algorithm prefix.
    pub fn hex(&self) -> String {
        hex::encode(&self.digest)
    }

    /// Reports whether `data` hashes to this ref.
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::of_bytes(self.algo, data) == *self
    }

    /// Abbreviated form for logs: `sha1-1234abcd`.
    pub fn short(&self) -> String {
        format!("{}-{}", self.algo.name(), hex::encode(&self.digest[..4]))
    }

    /// Pair this ref with a size.
    pub fn sized(self, size: u64) -> SizedBlobRef {
        SizedBlobRef { blob_ref: self, size }
    }
}

impl Ord for BlobRef {
    fn cmp(&self, other: &Self) -> Ordering {
        // Equivalent to comparing the formatted strings: the algorithm
        // names already order the same way their `<name>-` prefixes do,
        // and hex encoding preserves byte order.
        (self.algo.name(), &self.digest).cmp(&(other.algo.name(), &other.digest))
    }
}

impl PartialOrd for BlobRef {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.algo.name(), hex::encode(&self.digest))
    }
}

impl fmt::Debug for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobRef({})", self.short())
    }
}

impl FromStr for BlobRef {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for BlobRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BlobRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A [`BlobRef`] together with the blob's size in bytes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizedBlobRef {
    #[serde(rename = "blobRef")]
    pub blob_ref: BlobRef,
    pub size: u64,
}

impl fmt::Display for SizedBlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}]", self.blob_ref, self.size)
    }
}

/// Streaming digest for computing a [`BlobRef`] without buffering.
pub struct Hasher {
    algo: HashAlgo,
    inner: HasherInner,
    written: u64,
}

enum HasherInner {
    Sha1(sha1::Sha1),
    Sha224(sha2::Sha224),
    Sha256(sha2::Sha256),
}

impl Hasher {
    pub fn new(algo: HashAlgo) -> Self {
        let inner = match algo {
            HashAlgo::Sha1 => HasherInner::Sha1(sha1::Sha1::new()),
            HashAlgo::Sha224 => HasherInner::Sha224(sha2::Sha224::new()),
            HashAlgo::Sha256 => HasherInner::Sha256(sha2::Sha256::new()),
        };
        Self {
            algo,
            inner,
            written: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.written += data.len() as u64;
        match &mut self.inner {
            HasherInner::Sha1(h) => h.update(data),
            HasherInner::Sha224(h) => h.update(data),
            HasherInner::Sha256(h) => h.update(data),
        }
    }

    /// Bytes fed in so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn finish(self) -> BlobRef {
        let digest: Vec<u8> = match self.inner {
            HasherInner::Sha1(h) => h.finalize().to_vec(),
            HasherInner::Sha224(h) => h.finalize().to_vec(),
            HasherInner::Sha256(h) => h.finalize().to_vec(),
        };
        BlobRef {
            algo: self.algo,
            digest: digest.into_boxed_slice(),
        }
    }
}

/// Hashing is a sink, so a `Hasher` can sit on one side of a write-tee.
impl std::io::Write for Hasher {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.update(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
