//! Interpreter configuration

use crate::error::Result;
use crate::ext;
use crate::handle::{Garnet, Handle};
use garnet_vm::VmOptions;
use log::debug;
use std::fmt;

/// Setup run against a freshly opened interpreter, typically to define
/// classes and methods provided by another crate.
pub type Mutator = Box<dyn FnOnce(&Handle) -> Result<()>>;

/// Options for opening an interpreter.
#[derive(Debug, Clone)]
pub struct Options {
    /// Guest VM tuning
    pub vm: VmOptions,

    /// Install the default extensions (`garnet_version`)
    pub default_extensions: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            vm: VmOptions::default(),
            default_extensions: true,
        }
    }
}

/// Builder for [`Garnet`]
pub struct Builder {
    options: Options,
    mutators: Vec<Mutator>,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            options: Options::default(),
            mutators: Vec::new(),
        }
    }

    /// Replace all options
    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    /// Set the guest VM options
    pub fn vm(mut self, vm: VmOptions) -> Self {
        self.options.vm = vm;
        self
    }

    pub fn default_extensions(mut self, enabled: bool) -> Self {
        self.options.default_extensions = enabled;
        self
    }

    /// Add a mutator. Mutators run in the order added, after the default
    /// extensions.
    pub fn mutator<F>(self, f: F) -> Self
    where
        F: FnOnce(&Handle) -> Result<()> + 'static,
    {
        self.boxed_mutator(Box::new(f))
    }

    pub fn boxed_mutator(mut self, mutator: Mutator) -> Self {
        self.mutators.push(mutator);
        self
    }

    /// Open the interpreter and run the mutators. When one fails the
    /// interpreter is closed and the error returned.
    pub fn open(self) -> Result<Garnet> {
        let grb = Garnet::from_options(self.options.vm);
        if self.options.default_extensions {
            ext::register_default_extensions(&grb)?;
        }
        let count = self.mutators.len();
        for mutator in self.mutators {
            // `grb` drops on the error path, which closes it.
            mutator(&grb)?;
        }
        if count > 0 {
            debug!("ran {} mutators", count);
        }
        Ok(grb)
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("options", &self.options)
            .field("mutators", &self.mutators.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_mutators_run_in_order() {
        let grb = Builder::new()
            .mutator(|h| {
                h.load_string("$order = [1]")?;
                Ok(())
            })
            .mutator(|h| {
                h.load_string("$order << 2")?;
                Ok(())
            })
            .open()
            .expect("open");
        let order = grb.get_global_variable("$order");
        assert_eq!(order.inspect().expect("inspect"), "[1, 2]");
    }

    #[test]
    fn test_failing_mutator_closes() {
        let err = Garnet::with_mutators(vec![
            Box::new(|h: &Handle| {
                h.load_string("raise 'setup failed'")?;
                Ok(())
            }) as Mutator,
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Exception(_)));
        assert_eq!(err.to_string(), "setup failed");
    }

    #[test]
    fn test_vm_options_apply() {
        let vm = VmOptions {
            max_call_depth: 16,
            ..VmOptions::default()
        };
        let grb = Builder::new().vm(vm).open().expect("open");
        let err = grb
            .load_string("def deep(n)\n  deep(n + 1)\nend\ndeep(0)")
            .unwrap_err();
        let exc = err.exception().expect("exception");
        assert!(grb.mrb().is_exception(exc.raw()));
        assert!(grb.load_string("1").is_ok());
    }
}
