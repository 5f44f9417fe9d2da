//! CSPRNG access for keys, IVs, and salts.
//!
//! Every byte comes from the operating system CSPRNG. There is no fallback
//! generator: if the OS source fails, key/IV/salt generation fails with
//! `RandomnessUnavailable`.

use rand::rngs::OsRng;
use rand::RngCore;
use zkbox_core::{ZkError, ZkResult};

/// Fill a buffer from the OS CSPRNG.
pub fn fill_random(buf: &mut [u8]) -> ZkResult<()> {
    OsRng.try_fill_bytes(buf).map_err(|e| {
        tracing::error!(error = %e, "OS CSPRNG unavailable");
        ZkError::RandomnessUnavailable(e.to_string())
    })
}

/// Generate a random fixed-size array.
pub fn random_array<const N: usize>() -> ZkResult<[u8; N]> {
    let mut buf = [0u8; N];
    fill_random(&mut buf)?;
    Ok(buf)
}

/// Generate `len` random bytes.
pub fn random_vec(len: usize) -> ZkResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    fill_random(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_arrays_differ() {
        let a: [u8; 32] = random_array().unwrap();
        let b: [u8; 32] = random_array().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_random_vec_len() {
        assert_eq!(random_vec(0).unwrap().len(), 0);
        assert_eq!(random_vec(64).unwrap().len(), 64);
    }
}
