//! Wires the demo modules to storage and a shared batch coordinator.

use std::sync::Arc;

use stateful_core::{
    BatchCoordinator, BatchOp, EngineConfig, FlushReport, FsPersistence, FsStorage, HandlerId,
    JsonState, StateError, StatefulService, Storage, UpdateResult,
};

use crate::modules::{device_defaults, Device, Lights, Module};


pub struct Engine {
    coordinator: BatchCoordinator,
    lights: FsPersistence<Lights>,
    device: FsPersistence<Device>,
}

impl Engine {
    /// Open every module under `config.root_dir` and load its state.
    pub fn open(config: &EngineConfig, delayed: bool) -> Result<Engine, StateError> {
        let storage: Arc<dyn Storage> = Arc::new(FsStorage::new(&config.root_dir));
        Self::with_storage(config, storage, delayed)
    }

    pub fn with_storage(
        config: &EngineConfig,
        storage: Arc<dyn Storage>,
        delayed: bool,
    ) -> Result<Engine, StateError> {
        let coordinator = BatchCoordinator::new();

        let mut lights = FsPersistence::builder(
            StatefulService::new(Lights::default()),
            Arc::clone(&storage),
            config.module_path(Module::Lights.name()),
        )
        .pretty(config.pretty);
        let mut device = FsPersistence::builder(
            StatefulService::new(Device::default()),
            storage,
            config.module_path(Module::Device.name()),
        )
        .pretty(config.pretty)
        .defaults(device_defaults);
        if delayed {
            lights = lights.delayed(&coordinator);
            device = device.delayed(&coordinator);
        }

        let engine = Engine {
            coordinator,
            lights: lights.build(),
            device: device.build(),
        };
        engine.lights.load_from_storage()?;
        engine.device.load_from_storage()?;
        Ok(engine)
    }

    /// Module state as compact JSON.
    pub fn get(&self, module: Module) -> Result<String, String> {
        let json = match module {
            Module::Lights => serde_json::to_string(&self.lights.service().read_document()),
            Module::Device => serde_json::to_string(&self.device.service().read_document()),
        };
        json.map_err(|e| e.to_string())
    }

    /// Apply a partial JSON document on behalf of `origin_id`.
    pub fn set(&self, module: Module, json: &str, origin_id: &str) -> Result<UpdateResult, String> {
        let value: serde_json::Value =
            serde_json::from_str(json).map_err(|e| format!("invalid JSON: {}", e))?;
        Ok(match module {
            Module::Lights => self.lights.service().update_json(value, origin_id),
            Module::Device => self.device.service().update_json(value, origin_id),
        })
    }

    pub fn batch(&self, op: BatchOp) -> FlushReport {
        self.coordinator.apply(op)
    }

    pub fn pending(&self) -> Vec<String> {
        self.coordinator.pending_paths()
    }

    /// Call `notify(module, origin_id)` after every change to any module.
    pub fn subscribe<F>(&self, notify: F) -> Vec<(Module, HandlerId)>
    where
        F: Fn(Module, &str) + Clone + Send + Sync + 'static,
    {
        Module::ALL
            .iter()
            .map(|&module| {
                let notify = notify.clone();
                let id = match module {
                    Module::Lights => watch(self.lights.service(), module, notify),
                    Module::Device => watch(self.device.service(), module, notify),
                };
                (module, id)
            })
            .collect()
    }

    pub fn unsubscribe(&self, handles: &[(Module, HandlerId)]) {
        for &(module, id) in handles {
            match module {
                Module::Lights => self.lights.service().remove_update_handler(id),
                Module::Device => self.device.service().remove_update_handler(id),
            }
        }
    }
}

fn watch<T, F>(service: &StatefulService<T>, module: Module, notify: F) -> HandlerId
where
    T: JsonState,
    F: Fn(Module, &str) + Send + Sync + 'static,
{
    service.add_update_handler(move |origin_id| notify(module, origin_id))
}
