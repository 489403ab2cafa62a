use crate::Seed;
use sha2::Digest;
use sha2::Sha256;

/// per-trial seed: SHA-256 over (master seed, trial index), truncated
/// to the stream's 64-bit seed width. the truncation is what gets
/// recorded on the trial, and it fully determines the trial's stream.
pub fn derive(master: Seed, index: usize) -> Seed {
    let mut hasher = Sha256::new();
    hasher.update(master.to_le_bytes());
    hasher.update((index as u64).to_le_bytes());
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[24..32].try_into().expect("8-byte slice"))
}

/// bootstrap master seed from OS entropy when the study fixes none.
/// recorded on the study so every run stays replayable after the fact.
pub fn bootstrap() -> Seed {
    use rand::TryRngCore;
    rand::rngs::OsRng
        .try_next_u64()
        .expect("entropy source")
}
