use std::io;
use std::io::Read;

/// Zero-fill `n_bytes` of output. Used for the `ni` header tail and the V3
/// boot-block placeholder.
pub(crate) fn write_zeros<S: io::Write>(to: &mut S, n_bytes: u64) -> Result<(), io::Error> {
    io::copy(&mut io::repeat(0).take(n_bytes), to)?;
    Ok(())
}
