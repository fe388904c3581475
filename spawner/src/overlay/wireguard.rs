use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::info;

use crate::config::OverlayAddressing;
use crate::error::{Result, SpawnError};
use crate::types::{endpoint_with_port, Topology};

/// Render the scheduler's wg-quick config: its own interface, then one peer
/// per remote site in site ID order. Output depends only on the inputs.
pub fn render_config(addressing: &OverlayAddressing, topology: &Topology) -> String {
    let mut out = format!(
        "[Interface]\n\
         PrivateKey = {}\n\
         Address = {}/64\n\
         ListenPort = {}\n",
        topology.scheduler.keys.private.expose(),
        topology.scheduler.address,
        addressing.listen_port
    );

    for site in &topology.sites {
        out.push_str(&format!(
            "\n\
             # site {} ({})\n\
             [Peer]\n\
             PublicKey = {}\n\
             AllowedIPs = {}\n\
             PersistentKeepalive = {}\n\
             Endpoint = {}\n",
            site.site_id,
            site.login_target,
            site.keys.public,
            site.overlay_block,
            addressing.keepalive_secs,
            endpoint_with_port(&site.endpoint, addressing.listen_port)
        ));
    }

    out
}

/// Write the config next to its final path and rename it into place, so an
/// interrupted write never replaces a good file with a partial one.
/// The temporary file is created owner-only, which the rename preserves.
pub fn write_config(path: &Path, addressing: &OverlayAddressing, topology: &Topology) -> Result<()> {
    let write_err = |source: std::io::Error| SpawnError::ConfigWrite {
        path: path.display().to_string(),
        source,
    };

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(write_err)?;

    let contents = render_config(addressing, topology);
    let mut tmp = NamedTempFile::new_in(dir).map_err(write_err)?;
    tmp.write_all(contents.as_bytes()).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(path).map_err(|e| write_err(e.error))?;

    info!(
        "Wrote overlay config {} ({} peer(s))",
        path.display(),
        topology.sites.len()
    );
    Ok(())
}
