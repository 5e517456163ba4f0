//! Repositories over the realtime-database tree.
//!
//! Each repository owns one top-level branch of the tree and is a cheap
//! clone over the shared store handle.

mod agents;
mod bots;
mod ip_bans;
mod key_logs;
mod platform_keys;
mod platforms;
mod settings;
mod standalone_keys;

pub use agents::AgentsRepository;
pub use bots::BotsRepository;
pub use ip_bans::IpBansRepository;
pub use key_logs::KeyLogsRepository;
pub use platform_keys::PlatformKeysRepository;
pub use platforms::PlatformsRepository;
pub use settings::{AdminRepository, MaintenanceRepository};
pub use standalone_keys::StandaloneKeysRepository;

use crate::store::Db;

/// All repositories over one store.
#[derive(Clone)]
pub struct Repositories {
    pub agents: AgentsRepository,
    pub platforms: PlatformsRepository,
    pub standalone_keys: StandaloneKeysRepository,
    pub platform_keys: PlatformKeysRepository,
    pub bots: BotsRepository,
    pub key_logs: KeyLogsRepository,
    pub ip_bans: IpBansRepository,
    pub maintenance: MaintenanceRepository,
    pub admin: AdminRepository,
}

impl Repositories {
    pub fn new(db: Db) -> Self {
        Self {
            agents: AgentsRepository::new(db.clone()),
            platforms: PlatformsRepository::new(db.clone()),
            standalone_keys: StandaloneKeysRepository::new(db.clone()),
            platform_keys: PlatformKeysRepository::new(db.clone()),
            bots: BotsRepository::new(db.clone()),
            key_logs: KeyLogsRepository::new(db.clone()),
            ip_bans: IpBansRepository::new(db.clone()),
            maintenance: MaintenanceRepository::new(db.clone()),
            admin: AdminRepository::new(db),
        }
    }
}
