mod interface;
mod wireguard;

pub use interface::OverlayInterface;
pub use wireguard::write_config;
