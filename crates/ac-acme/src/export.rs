use crate::types::{AcmeError, AcmeResult, CertificateBundle};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{error, info};

/// Write the plaintext artifacts a TLS-terminating server consumes:
/// `cert.pem` (world-readable), `privkey.pem` and `combined.pem`
/// (owner-only). Plain overwrites, not atomic: the cache entry is already
/// durable before export runs, and the next successful pass rewrites these
/// files. Each failure is logged; the first one is reported, files already
/// written stay in place.
pub fn export(data_dir: &Path, bundle: &CertificateBundle) -> AcmeResult<()> {
    fs::create_dir_all(data_dir)?;

    let mut combined = Vec::with_capacity(bundle.private_key.len() + bundle.certificate.len() + 1);
    combined.extend_from_slice(&bundle.private_key);
    combined.push(b'\n');
    combined.extend_from_slice(&bundle.certificate);

    let targets: [(&str, &[u8], u32); 3] = [
        ("cert.pem", &bundle.certificate, 0o644),
        ("privkey.pem", &bundle.private_key, 0o600),
        ("combined.pem", &combined, 0o600),
    ];

    let mut first_error = None;
    for (name, data, mode) in targets {
        let path = data_dir.join(name);
        info!(domain = %bundle.domain, file = %path.display(), "exporting");
        if let Err(e) = write_with_mode(&path, data, mode) {
            error!(file = %path.display(), error = %e, "export failed");
            first_error.get_or_insert_with(|| {
                AcmeError::Export(format!("writing {} failed: {}", name, e))
            });
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn write_with_mode(path: &Path, data: &[u8], mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)?;
    file.write_all(data)?;
    // mode() only applies at creation; keep overwritten files in line too
    file.set_permissions(fs::Permissions::from_mode(mode))
}
