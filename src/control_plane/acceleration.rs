//! The acceleration URL rewrite (§4.2): "every subsequent part PUT URL is
//! rewritten by substituting the standard `.s3.<region>.amazonaws.com` host
//! component with the returned endpoint," gated on the file crossing
//! `S3_TRANSFER_ACCELERATION.MIN_SIZE` and acceleration being enabled.
//!
//! Pulled out as a standalone, synchronous function (rather than left
//! private inside the HTTP transport) so the Upload Engine can apply the
//! same rewrite to a signed URL it already holds, without re-entering the
//! control-plane client.

use crate::config::AccelerationConfig;

/// Rewrites `url`'s host for transfer acceleration, iff `endpoint` was
/// granted at initiate time AND `file_size` meets the configured minimum.
/// Idempotent: rewriting an already-rewritten URL a second time is a no-op
/// because the `.s3.` needle is gone after the first rewrite.
pub fn accelerate_url(url: &str, endpoint: Option<&str>, file_size: u64, config: &AccelerationConfig) -> String {
    match endpoint {
        Some(endpoint) if config.enabled && file_size >= config.min_size => match url.find(".s3.") {
            Some(start) => {
                let host_end = url[start..].find('/').map(|i| start + i).unwrap_or(url.len());
                let scheme_end = url.find("://").map(|i| i + 3).unwrap_or(0);
                format!("{}{}{}", &url[..scheme_end], endpoint, &url[host_end..])
            }
            None => url.to_string(),
        },
        _ => url.to_string(),
    }
}
