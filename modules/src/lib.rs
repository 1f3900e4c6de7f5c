//! modircd extension modules
//!
//! Every module here is statically linked and reachable by name through
//! [`builtin_catalog`]. The server loads them from the `[modules] load` list or on
//! LOADMODULE, and unloads them again without a restart.

pub mod allowdenychans;
pub mod banversion;
pub mod botmode;
pub mod cloaking;
pub mod connflood;
pub mod hash;
pub mod hidechans;
pub mod joinflood;
pub mod restrictbanned;
pub mod sha256;
pub mod whoismodes;

#[cfg(test)]
pub(crate) mod testing;

pub use allowdenychans::AllowDenyChansModule;
pub use banversion::BanVersionModule;
pub use botmode::BotModeModule;
pub use cloaking::CloakingModule;
pub use connflood::ConnFloodModule;
pub use hidechans::HideChansModule;
pub use joinflood::JoinFloodModule;
pub use restrictbanned::RestrictBannedModule;
pub use sha256::Sha256Module;
pub use whoismodes::WhoisModesModule;

use modircd_core::{Module, ModuleCatalog};

/// Every module shipped with the daemon
pub fn builtin_catalog() -> ModuleCatalog {
    let mut catalog = ModuleCatalog::new();
    catalog
        .register("allowdenychans", || Box::new(AllowDenyChansModule::new()) as Box<dyn Module>)
        .register("banversion", || Box::new(BanVersionModule::new()) as Box<dyn Module>)
        .register("botmode", || Box::new(BotModeModule::new()) as Box<dyn Module>)
        .register("cloaking", || Box::new(CloakingModule::new()) as Box<dyn Module>)
        .register("connflood", || Box::new(ConnFloodModule::new()) as Box<dyn Module>)
        .register("hidechans", || Box::new(HideChansModule::new()) as Box<dyn Module>)
        .register("joinflood", || Box::new(JoinFloodModule::new()) as Box<dyn Module>)
        .register("restrictbanned", || Box::new(RestrictBannedModule::new()) as Box<dyn Module>)
        .register("sha256", || Box::new(Sha256Module::new()) as Box<dyn Module>)
        .register("whoismodes", || Box::new(WhoisModesModule::new()) as Box<dyn Module>);
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names() {
        let catalog = builtin_catalog();
        let names: Vec<&str> = catalog.names().collect();
        assert_eq!(
            names,
            vec![
                "allowdenychans",
                "banversion",
                "botmode",
                "cloaking",
                "connflood",
                "hidechans",
                "joinflood",
                "restrictbanned",
                "sha256",
                "whoismodes"
            ]
        );
        assert_eq!(catalog.matching("*flood"), vec!["connflood", "joinflood"]);
    }
}
