//! On-disk copies of the SVID chain and trust bundle.
//!
//! Both are written as concatenated DER through a temporary file renamed over the
//! target. The private key is never written.

use crate::bundle::X509Bundle;
use crate::svid::X509Svid;
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub(super) struct Storage {
    pub(super) svid_path: Option<PathBuf>,
    pub(super) bundle_path: Option<PathBuf>,
}

impl Storage {
    pub(super) async fn store_svid(&self, svid: &X509Svid) -> io::Result<()> {
        let Some(path) = &self.svid_path else {
            return Ok(());
        };
        let der: Vec<u8> = svid
            .cert_chain()
            .iter()
            .flat_map(|c| c.as_bytes().iter().copied())
            .collect();
        write_atomic(path, &der).await
    }

    pub(super) async fn store_bundle(&self, bundle: &X509Bundle) -> io::Result<()> {
        let Some(path) = &self.bundle_path else {
            return Ok(());
        };
        write_atomic(path, &bundle.to_der()).await
    }
}

async fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut tmp = OsString::from(path.as_os_str());
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, data).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e);
    }
    Ok(())
}
