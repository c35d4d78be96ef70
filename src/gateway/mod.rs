// Command gateway: cooldown, backoff, payload validation and bridge dispatch
pub mod cooldown;
pub mod dispatcher;
pub mod payload;

pub use cooldown::{BackoffStore, CommandKey, CooldownStore};
pub use dispatcher::{CommandGateway, GatewayConfig};
pub use payload::{Command, ProgramRef, ProgramUpdate};
