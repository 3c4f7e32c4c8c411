//! Resolves the nested support levels a remote privacy configuration grants
//! the sync engine.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncSupportLevel {
    Unavailable,
    Level0ShowSync,
    Level1AllowDataSyncing,
    Level2AllowSetupFlows,
    Level3AllowCreateAccount,
}

/// The subset of a remote privacy configuration the engine needs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteSyncConfig {
    pub feature_enabled: bool,
    pub data_syncing: bool,
    pub setup_flows: bool,
    pub create_account: bool,
}

pub fn resolve_support_level(config: &RemoteSyncConfig) -> SyncSupportLevel {
    if !config.feature_enabled {
        return SyncSupportLevel::Unavailable;
    }
    if !config.data_syncing {
        return SyncSupportLevel::Level0ShowSync;
    }
    if !config.setup_flows {
        return SyncSupportLevel::Level1AllowDataSyncing;
    }
    if !config.create_account {
        return SyncSupportLevel::Level2AllowSetupFlows;
    }
    SyncSupportLevel::Level3AllowCreateAccount
}

/// Whether the sync queue should attempt network operations at all. Below
/// `Level1AllowDataSyncing` the queue still performs registration
/// bookkeeping, it just never talks to the server.
pub fn network_sync_permitted(level: SyncSupportLevel) -> bool {
    level >= SyncSupportLevel::Level1AllowDataSyncing
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_feature_is_unavailable_regardless_of_other_flags() {
        let config = RemoteSyncConfig {
            feature_enabled: false,
            data_syncing: true,
            setup_flows: true,
            create_account: true,
        };
        assert_eq!(resolve_support_level(&config), SyncSupportLevel::Unavailable);
    }

    #[test]
    fn levels_resolve_in_order() {
        assert_eq!(
            resolve_support_level(&RemoteSyncConfig {
                feature_enabled: true,
                ..Default::default()
            }),
            SyncSupportLevel::Level0ShowSync
        );
        assert_eq!(
            resolve_support_level(&RemoteSyncConfig {
                feature_enabled: true,
                data_syncing: true,
                setup_flows: true,
                create_account: true,
            }),
            SyncSupportLevel::Level3AllowCreateAccount
        );
    }

    #[test]
    fn network_sync_requires_at_least_level1() {
        assert!(!network_sync_permitted(SyncSupportLevel::Level0ShowSync));
        assert!(network_sync_permitted(SyncSupportLevel::Level1AllowDataSyncing));
    }
}
