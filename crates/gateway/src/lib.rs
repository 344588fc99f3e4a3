//! Session/transport engine for the furrow gateway.
//!
//! Lifecycle:
//! 1. Load config, implement profile, and the deployed version marker
//! 2. Build the single shared [`state::GatewayState`]
//! 3. Bind the TCP listener; bind RFCOMM when the radio stack is present
//! 4. Each accepted connection runs its own session task: mandatory
//!    HELLO handshake, then dispatch against the shared state
//!
//! Telemetry producers push through [`broadcast::broadcast`]; the host
//! supervisor and GNSS hardware sit behind the seams in [`services`].

#[cfg(feature = "bluetooth")]
pub mod bluetooth;
pub mod broadcast;
pub mod dispatch;
pub mod server;
pub mod services;
pub mod session;
pub mod state;
pub mod update;
