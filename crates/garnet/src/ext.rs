//! Default guest extensions
//!
//! Installed at open unless [`Options::default_extensions`](crate::Options)
//! is off. Everything here is reachable from every guest object.

use crate::args::ArgSpec;
use crate::error::Result;
use crate::handle::Handle;
use log::debug;

/// Module included into `Object`.
pub const INSTANCE_MODULE: &str = "GarnetInstanceMethods";
/// Module extended into `Object`.
pub const CLASS_MODULE: &str = "GarnetClassMethods";

/// Bridge version reported to the guest by `garnet_version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Define the extension modules and mix them into `Object`.
pub fn register_default_extensions(handle: &Handle) -> Result<()> {
    let instance = handle.define_module(INSTANCE_MODULE);
    let class = handle.define_module(CLASS_MODULE);

    instance.define_method("garnet_version", |grb, _this| Ok(Some(grb.to_guest(VERSION))), ArgSpec::none());

    let object = handle.object_class();
    object.include(&instance);
    object.extend(&class);
    debug!("default extensions registered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Builder, Garnet};

    #[test]
    fn test_version_is_visible_everywhere() {
        let grb = Garnet::open().expect("open");
        let top = grb.load_string("garnet_version").expect("top level");
        assert_eq!(top.to_string(), VERSION);
        let nested = grb.load_string("[1].first.garnet_version").expect("any object");
        assert_eq!(nested.to_string(), VERSION);
        assert!(grb.module(INSTANCE_MODULE).is_ok());
        assert!(grb.module(CLASS_MODULE).is_ok());
    }

    #[test]
    fn test_extensions_can_be_disabled() {
        let grb = Builder::new().default_extensions(false).open().expect("open");
        assert!(grb.load_string("garnet_version").is_err());
        assert!(!grb.const_defined(INSTANCE_MODULE, *grb.object_class()));
    }
}
