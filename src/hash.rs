use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::job::{NONCE_OFFSET, NONCE_SIZE};
use randomx_rs::{RandomXCache, RandomXDataset, RandomXFlag, RandomXVM};
use std::time::{Duration, Instant};

pub const HASH_SIZE: usize = 32;

/// Offset of the 32-bit comparison word inside a digest.
pub const COMPARE_OFFSET: usize = 28;

pub const DEFAULT_CHECK_INTERVAL: u64 = 1024;

const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// A proof-of-work hash function.
pub trait PowHash {
    fn hash(&mut self, input: &[u8]) -> Result<[u8; HASH_SIZE]>;

    /// Re-keys the function for jobs that carry a seed. Keyless functions
    /// ignore it.
    fn reseed(&mut self, _seed: &[u8]) -> Result<()> {
        Ok(())
    }
}

impl<H: PowHash + ?Sized> PowHash for Box<H> {
    fn hash(&mut self, input: &[u8]) -> Result<[u8; HASH_SIZE]> {
        (**self).hash(input)
    }

    fn reseed(&mut self, seed: &[u8]) -> Result<()> {
        (**self).reseed(seed)
    }
}

pub struct RandomXHash {
    flags: RandomXFlag,
    light: bool,
    seed: Vec<u8>,
    vm: RandomXVM,
}

impl RandomXHash {
    /// Light mode hashes from the 256 MiB cache; full mode builds the 2 GiB
    /// dataset up front.
    #[tracing::instrument(skip(seed))]
    pub fn new(seed: &[u8], light: bool) -> Result<Self> {
        let mut flags = RandomXFlag::get_recommended_flags();
        if !light {
            flags |= RandomXFlag::FLAG_FULL_MEM;
        }
        let vm = Self::build_vm(flags, seed, light)?;
        Ok(Self {
            flags,
            light,
            seed: seed.to_vec(),
            vm,
        })
    }

    fn build_vm(flags: RandomXFlag, seed: &[u8], light: bool) -> Result<RandomXVM> {
        let cache = RandomXCache::new(flags, seed)?;
        let vm = if light {
            RandomXVM::new(flags, Some(cache), None)?
        } else {
            let dataset = RandomXDataset::new(flags, cache, 0)?;
            RandomXVM::new(flags, None, Some(dataset))?
        };
        Ok(vm)
    }
}

impl PowHash for RandomXHash {
    fn hash(&mut self, input: &[u8]) -> Result<[u8; HASH_SIZE]> {
        let out = self.vm.calculate_hash(input)?;
        out.as_slice()
            .try_into()
            .map_err(|_| Error::HashOutput { len: out.len() })
    }

    fn reseed(&mut self, seed: &[u8]) -> Result<()> {
        if seed == self.seed.as_slice() {
            return Ok(());
        }
        tracing::info!(seed = %hex::encode(seed), "reinitializing RandomX for new seed");
        self.vm = Self::build_vm(self.flags, seed, self.light)?;
        self.seed = seed.to_vec();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashResult {
    pub nonce: [u8; NONCE_SIZE],
    pub digest: [u8; HASH_SIZE],
}

pub struct HashEngine<H> {
    hasher: H,
    check_interval: u64,
    total_hashes: u64,
    window_hashes: u64,
    last_report: Instant,
}

impl<H: PowHash> HashEngine<H> {
    pub fn new(hasher: H, check_interval: u64) -> Self {
        Self {
            hasher,
            check_interval: check_interval.max(1),
            total_hashes: 0,
            window_hashes: 0,
            last_report: Instant::now(),
        }
    }

    pub fn hasher_mut(&mut self) -> &mut H {
        &mut self.hasher
    }

    pub fn total_hashes(&self) -> u64 {
        self.total_hashes
    }

    /// Hashes `blob`, bumping its nonce after every miss, until the comparison
    /// word of a digest is below `target`.
    ///
    /// Returns `Ok(None)` when `cancel` fires; the token is polled every
    /// `check_interval` hashes.
    pub fn search(
        &mut self,
        blob: &mut [u8],
        target: u32,
        cancel: &CancelToken,
    ) -> Result<Option<HashResult>> {
        self.search_with(blob, target, cancel, || Ok(false))
    }

    /// Like [`search`](Self::search), also calling `between_batches` at every
    /// cancellation check. The search is abandoned when it returns `true`,
    /// leaving the next untried nonce in `blob`.
    pub fn search_with<F>(
        &mut self,
        blob: &mut [u8],
        target: u32,
        cancel: &CancelToken,
        mut between_batches: F,
    ) -> Result<Option<HashResult>>
    where
        F: FnMut() -> Result<bool>,
    {
        if blob.len() < NONCE_OFFSET + NONCE_SIZE {
            return Err(Error::BlobTooShort { len: blob.len() });
        }
        let mut since_check = 0;
        loop {
            if since_check == 0 {
                if cancel.is_cancelled() || between_batches()? {
                    return Ok(None);
                }
                self.report();
            }
            since_check = (since_check + 1) % self.check_interval;

            let digest = self.hasher.hash(blob)?;
            self.total_hashes += 1;
            self.window_hashes += 1;

            if compare_word(&digest) < target {
                return Ok(Some(HashResult {
                    nonce: read_nonce(blob),
                    digest,
                }));
            }

            let nonce = increment_nonce(blob);
            if nonce % 100_000 == 0 {
                tracing::debug!(nonce, target, "searching");
            }
        }
    }

    fn report(&mut self) {
        let elapsed = self.last_report.elapsed();
        if elapsed >= REPORT_INTERVAL {
            let hashrate = self.window_hashes as f64 / elapsed.as_secs_f64();
            tracing::info!("Hashrate: {:.2} H/s, total hashes: {}", hashrate, self.total_hashes);
            self.window_hashes = 0;
            self.last_report = Instant::now();
        }
    }
}

/// Reads the comparison word of a digest.
pub fn compare_word(digest: &[u8; HASH_SIZE]) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&digest[COMPARE_OFFSET..COMPARE_OFFSET + 4]);
    u32::from_le_bytes(word)
}

/// Bumps the nonce embedded in `blob` by one, wrapping, and returns the new
/// value. The caller guarantees the blob is long enough.
pub(crate) fn increment_nonce(blob: &mut [u8]) -> u32 {
    let nonce = u32::from_le_bytes(read_nonce(blob)).wrapping_add(1);
    blob[NONCE_OFFSET..NONCE_OFFSET + NONCE_SIZE].copy_from_slice(&nonce.to_le_bytes());
    nonce
}

fn read_nonce(blob: &[u8]) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce.copy_from_slice(&blob[NONCE_OFFSET..NONCE_OFFSET + NONCE_SIZE]);
    nonce
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Returns digests whose comparison words follow a fixed script, then
    /// repeats the last one. Records each nonce it was asked to hash.
    pub(crate) struct ScriptedHash {
        pub words: Vec<u32>,
        pub calls: usize,
        pub seen_nonces: Vec<[u8; NONCE_SIZE]>,
        pub seeds: Vec<Vec<u8>>,
    }

    impl ScriptedHash {
        pub(crate) fn new(words: Vec<u32>) -> Self {
            Self {
                words,
                calls: 0,
                seen_nonces: Vec::new(),
                seeds: Vec::new(),
            }
        }
    }

    impl PowHash for ScriptedHash {
        fn hash(&mut self, input: &[u8]) -> Result<[u8; HASH_SIZE]> {
            self.seen_nonces.push(read_nonce(input));
            let word = self
                .words
                .get(self.calls)
                .or(self.words.last())
                .copied()
                .unwrap_or(u32::MAX);
            self.calls += 1;
            let mut digest = [0xaau8; HASH_SIZE];
            digest[COMPARE_OFFSET..].copy_from_slice(&word.to_le_bytes());
            Ok(digest)
        }

        fn reseed(&mut self, seed: &[u8]) -> Result<()> {
            self.seeds.push(seed.to_vec());
            Ok(())
        }
    }

    fn blob() -> Vec<u8> {
        vec![0u8; 76]
    }

    #[test]
    fn test_nonce_increments_until_below_target() {
        // First value below 25 is at index 3, so three misses.
        let mut engine = HashEngine::new(ScriptedHash::new(vec![50, 40, 30, 20, 10]), 1024);
        let mut blob = blob();
        let result = engine
            .search(&mut blob, 25, &CancelToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(result.nonce, [3, 0, 0, 0]);
        assert_eq!(compare_word(&result.digest), 20);
        assert_eq!(&blob[NONCE_OFFSET..NONCE_OFFSET + 4], &[3, 0, 0, 0]);
        assert_eq!(
            engine.hasher_mut().seen_nonces,
            vec![[0, 0, 0, 0], [1, 0, 0, 0], [2, 0, 0, 0], [3, 0, 0, 0]]
        );
        assert_eq!(engine.total_hashes(), 4);
    }

    #[test]
    fn test_equal_word_is_not_accepted() {
        let mut engine = HashEngine::new(ScriptedHash::new(vec![25, 24]), 1024);
        let mut blob = blob();
        let result = engine
            .search(&mut blob, 25, &CancelToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(result.nonce, [1, 0, 0, 0]);
    }

    #[test]
    fn test_nonce_wraps_little_endian() {
        let mut engine = HashEngine::new(ScriptedHash::new(vec![9, 9, 0]), 1024);
        let mut blob = blob();
        blob[NONCE_OFFSET..NONCE_OFFSET + 4].copy_from_slice(&[0xff, 0xff, 0xff, 0xff]);
        let result = engine
            .search(&mut blob, 1, &CancelToken::new())
            .unwrap()
            .unwrap();
        assert_eq!(result.nonce, [1, 0, 0, 0]);
        assert_eq!(blob[NONCE_OFFSET - 1], 0);
        assert_eq!(blob[NONCE_OFFSET + 4], 0);
    }

    #[test]
    fn test_short_blob_rejected() {
        let mut engine = HashEngine::new(ScriptedHash::new(vec![0]), 1024);
        let mut blob = vec![0x00, 0x11];
        assert!(matches!(
            engine.search(&mut blob, u32::MAX, &CancelToken::new()),
            Err(Error::BlobTooShort { len: 2 })
        ));
    }

    #[test]
    fn test_cancel_checked_in_batches() {
        let mut engine = HashEngine::new(ScriptedHash::new(vec![u32::MAX]), 16);
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut blob = blob();
        assert_eq!(engine.search(&mut blob, 1, &cancel).unwrap(), None);
        assert_eq!(engine.total_hashes(), 0);
    }

    #[test]
    fn test_batch_hook_abandons_search() {
        let mut engine = HashEngine::new(ScriptedHash::new(vec![u32::MAX]), 8);
        let mut blob = blob();
        let mut batches = 0;
        let result = engine
            .search_with(&mut blob, 1, &CancelToken::new(), || {
                batches += 1;
                Ok(batches == 3)
            })
            .unwrap();
        assert_eq!(result, None);
        assert_eq!(engine.total_hashes(), 16);
        // Resuming starts at the first nonce not yet hashed.
        assert_eq!(&blob[NONCE_OFFSET..NONCE_OFFSET + 4], &[16, 0, 0, 0]);
    }

    #[test]
    fn test_batch_hook_error_propagates() {
        let mut engine = HashEngine::new(ScriptedHash::new(vec![u32::MAX]), 8);
        let mut blob = blob();
        let result = engine.search_with(&mut blob, 1, &CancelToken::new(), || {
            Err(Error::Disconnected)
        });
        assert!(matches!(result, Err(Error::Disconnected)));
        assert_eq!(engine.total_hashes(), 0);
    }

    #[test]
    fn test_cancel_during_search() {
        struct CancelAfter {
            inner: ScriptedHash,
            after: usize,
            cancel: CancelToken,
        }
        impl PowHash for CancelAfter {
            fn hash(&mut self, input: &[u8]) -> Result<[u8; HASH_SIZE]> {
                if self.inner.calls == self.after {
                    self.cancel.cancel();
                }
                self.inner.hash(input)
            }
        }

        let cancel = CancelToken::new();
        let hasher = CancelAfter {
            inner: ScriptedHash::new(vec![u32::MAX]),
            after: 5,
            cancel: cancel.clone(),
        };
        let mut engine = HashEngine::new(hasher, 8);
        let mut blob = blob();
        assert_eq!(engine.search(&mut blob, 1, &cancel).unwrap(), None);
        // Stops at the next batch boundary.
        assert_eq!(engine.total_hashes(), 8);
    }
}
