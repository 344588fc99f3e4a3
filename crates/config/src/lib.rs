//! Configuration for the furrow gateway: file discovery and loading,
//! deployment paths, and the implement profile provider.

pub mod loader;
pub mod paths;
pub mod profile;
pub mod schema;

pub use loader::{clear_config_dir, discover_and_load, load_config, set_config_dir};
pub use profile::{ImplementProfile, SectionProfile, load_implement_profile};
pub use schema::{
    BluetoothConfig, FurrowConfig, GatewayConfig, ImplementConfig, SimulatorConfig, UpdateConfig,
};
