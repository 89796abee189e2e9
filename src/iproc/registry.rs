use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::iproc::{
    CmemsInputProcessor, DefaultInputProcessor, InputProcessor, SnapNetcdfInputProcessor,
};
use crate::types::{GenError, GenResult};

/// Creates a fresh, unconfigured processor
pub type ProcessorFactory = fn() -> Box<dyn InputProcessor>;

/// Read-only table of the available input processors
pub struct ProcessorRegistry {
    factories: BTreeMap<&'static str, ProcessorFactory>,
}

impl ProcessorRegistry {
    fn with_factories(list: &[ProcessorFactory]) -> Self {
        let factories = list
            .iter()
            .map(|&factory| (factory().name(), factory))
            .collect();
        Self { factories }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names in alphabetical order
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.factories.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Instantiate the processor registered under `name`
    pub fn create(&self, name: &str) -> GenResult<Box<dyn InputProcessor>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| GenError::UnknownProcessor(name.to_string()))
    }
}

fn new_default() -> Box<dyn InputProcessor> {
    Box::new(DefaultInputProcessor::new())
}

fn new_cmems() -> Box<dyn InputProcessor> {
    Box::new(CmemsInputProcessor::new())
}

fn new_snap_olci_highroc_l2() -> Box<dyn InputProcessor> {
    Box::new(SnapNetcdfInputProcessor::highroc())
}

fn new_snap_olci_cyanoalert_l2() -> Box<dyn InputProcessor> {
    Box::new(SnapNetcdfInputProcessor::cyanoalert())
}

/// Process-wide processor registry, built on first use
pub fn registry() -> &'static ProcessorRegistry {
    static REGISTRY: OnceLock<ProcessorRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let factories: [ProcessorFactory; 4] = [
            new_default,
            new_cmems,
            new_snap_olci_highroc_l2,
            new_snap_olci_cyanoalert_l2,
        ];
        let registry = ProcessorRegistry::with_factories(&factories);
        log::debug!(
            "Registered input processors: {}",
            registry.names().collect::<Vec<_>>().join(", ")
        );
        registry
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_processors_registered() {
        let names: Vec<&str> = registry().names().collect();
        assert_eq!(
            names,
            vec![
                "cmems",
                "default",
                "snap-olci-cyanoalert-l2",
                "snap-olci-highroc-l2"
            ]
        );
        for name in names {
            assert_eq!(registry().create(name).unwrap().name(), name);
        }
    }

    #[test]
    fn test_descriptions() {
        let description = |name: &str| registry().create(name).unwrap().description();
        assert_eq!(
            description("default"),
            "Single-scene swath NetCDF/CF inputs in target expression vocabulary"
        );
        assert_eq!(
            description("cmems"),
            "Single-scene daily or hourly CMEMS NetCDF/CF inputs"
        );
        assert_eq!(
            description("snap-olci-highroc-l2"),
            "SNAP Sentinel-3 OLCI HIGHROC Level-2 NetCDF inputs"
        );
        assert_eq!(
            description("snap-olci-cyanoalert-l2"),
            "SNAP Sentinel-3 OLCI CyanoAlert Level-2 NetCDF inputs"
        );
    }

    #[test]
    fn test_unknown_processor() {
        assert!(!registry().contains("snap-olci-l1"));
        assert!(matches!(
            registry().create("snap-olci-l1"),
            Err(GenError::UnknownProcessor(name)) if name == "snap-olci-l1"
        ));
    }

    #[test]
    fn test_concurrent_access() {
        let handles: Vec<_> = (0..4)
            .map(|_| std::thread::spawn(|| registry().len()))
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 4);
        }
    }
}
