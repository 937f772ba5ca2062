//! Secondary core instance
//!
//! A second, independently loaded copy of the primary core is kept one real
//! frame ahead so speculation never has to roll the primary back. Some
//! platforms will not load the same shared object twice with separate
//! globals, so the library is copied to a temporary file first and the copy
//! is loaded.

use crate::hooks::HookedCore;
use crate::input::{run_with_last_input, InputTracker};
use crate::savestate::SerializedState;
use oc_core::{
    AvGate, CoreInstance, CoreLoader, CoreSource, EnvironmentFn, EnvironmentRequest,
    RunAheadError, SavestateContext, MAX_PORTS,
};
use rand::Rng;
use std::cell::Cell;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

/// Names tried before giving up on a free temporary file name
pub const MAX_COPY_ATTEMPTS: u32 = 30;

/// Copy `library` into `temp_root`.
///
/// The first attempt keeps the library's file name; after a collision a
/// random suffix is appended to the stem.
pub fn copy_library_to_temp(library: &Path, temp_root: &Path) -> io::Result<PathBuf> {
    copy_library_to_temp_with(library, temp_root, &mut rand::thread_rng())
}

/// [`copy_library_to_temp`] drawing suffixes from `rng`
pub fn copy_library_to_temp_with<R: Rng>(
    library: &Path,
    temp_root: &Path,
    rng: &mut R,
) -> io::Result<PathBuf> {
    let bytes = fs::read(library)?;
    fs::create_dir_all(temp_root)?;

    let file_name = library
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "core".to_string());
    let stem = library
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "core".to_string());
    let extension = library
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default();

    for attempt in 0..MAX_COPY_ATTEMPTS {
        let name = if attempt == 0 {
            file_name.clone()
        } else {
            format!("{}_{:08x}{}", stem, rng.gen::<u32>(), extension)
        };
        let path = temp_root.join(name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                if let Err(e) = file.write_all(&bytes).and_then(|_| file.sync_all()) {
                    drop(file);
                    let _ = fs::remove_file(&path);
                    return Err(e);
                }
                return Ok(path);
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::trace!("Temporary core name taken: {}", path.display());
            }
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!(
            "no free temporary name for {} after {} attempts",
            file_name, MAX_COPY_ATTEMPTS
        ),
    ))
}

/// Environment seen by the secondary instance.
///
/// Variable updates are reported from the mirrored pending flag; everything
/// else goes to the frontend's environment.
fn secondary_environment(frontend: Option<EnvironmentFn>, pending: Rc<Cell<bool>>) -> EnvironmentFn {
    Rc::new(move |request: EnvironmentRequest<'_>| match request {
        EnvironmentRequest::VariableUpdate(updated) => {
            *updated = pending.replace(false);
            true
        }
        other => frontend.as_ref().is_some_and(|env| env(other)),
    })
}

/// Manager of the secondary instance's whole lifetime
pub struct SecondaryCore {
    source: CoreSource,
    loader: Box<dyn CoreLoader>,
    instance: Option<Box<dyn CoreInstance>>,
    temp_path: Option<PathBuf>,
    initialized: bool,
    game_loaded: bool,
    pending_ports: [Option<u32>; MAX_PORTS],
    mirrored_ports: [Option<u32>; MAX_PORTS],
    variable_update: Rc<Cell<bool>>,
}

impl SecondaryCore {
    pub fn new(source: CoreSource, loader: Box<dyn CoreLoader>) -> Self {
        Self {
            source,
            loader,
            instance: None,
            temp_path: None,
            initialized: false,
            game_loaded: false,
            pending_ports: [None; MAX_PORTS],
            mirrored_ports: [None; MAX_PORTS],
            variable_update: Rc::new(Cell::new(false)),
        }
    }

    pub fn exists(&self) -> bool {
        self.instance.is_some()
    }

    /// Location of the library copy while the instance exists
    pub fn temp_path(&self) -> Option<&Path> {
        self.temp_path.as_deref()
    }

    /// Devices set on the secondary instance, in port order
    pub fn port_devices(&self) -> Vec<(u32, u32)> {
        self.mirrored_ports
            .iter()
            .enumerate()
            .filter_map(|(port, device)| device.map(|device| (port as u32, device)))
            .collect()
    }

    /// Ports remembered while no instance existed
    pub fn pending_port_count(&self) -> usize {
        self.pending_ports.iter().filter(|p| p.is_some()).count()
    }

    /// A core option changed; the secondary sees it on its next variable query
    pub fn notify_variable_update(&self) {
        self.variable_update.set(true);
    }

    /// Forward a port device change, or keep it until the next bring-up
    pub fn remember_port_device(&mut self, port: u32, device: u32) {
        let index = port as usize;
        if index >= MAX_PORTS {
            return;
        }

        match self.instance.as_mut() {
            Some(instance) => {
                instance.set_controller_port_device(port, device);
                self.mirrored_ports[index] = Some(device);
            }
            None => self.pending_ports[index] = Some(device),
        }
    }

    /// Bring up a fresh instance mirroring `primary`
    pub fn provision(&mut self, primary: &HookedCore, temp_root: &Path) -> Result<(), RunAheadError> {
        let fail = |what: &str, detail: String| {
            RunAheadError::SecondaryProvisionFailure(format!("{}: {}", what, detail))
        };

        let temp_path = copy_library_to_temp(&self.source.library_path, temp_root)
            .map_err(|e| fail("copy", e.to_string()))?;
        tracing::debug!(
            "Copied {} to {}",
            self.source.library_path.display(),
            temp_path.display()
        );
        self.temp_path = Some(temp_path.clone());

        let mut instance = self
            .loader
            .load(&temp_path)
            .map_err(|e| fail("load", e.to_string()))?;

        let mut callbacks = primary.original_callbacks();
        callbacks.environment = Some(secondary_environment(
            callbacks.environment.take(),
            self.variable_update.clone(),
        ));
        instance.set_callbacks(callbacks);

        instance.init();
        self.initialized = true;
        self.instance = Some(instance);

        let instance = self
            .instance
            .as_mut()
            .ok_or_else(|| fail("init", "instance vanished".to_string()))?;
        if !instance.load_game(self.source.game.as_ref()) {
            return Err(fail("load_game", "core rejected content".to_string()));
        }
        self.game_loaded = true;

        let mut ports = [None; MAX_PORTS];
        for (port, device) in primary.port_devices() {
            ports[port as usize] = Some(device);
        }
        for (port, pending) in self.pending_ports.iter().enumerate() {
            if pending.is_some() {
                ports[port] = *pending;
            }
        }
        for (port, device) in ports.iter().enumerate() {
            if let Some(device) = device {
                instance.set_controller_port_device(port as u32, *device);
            }
        }
        self.mirrored_ports = ports;
        self.pending_ports = [None; MAX_PORTS];

        tracing::info!("Secondary core instance created");
        Ok(())
    }

    /// Provision unless an instance already exists. A failed bring-up is torn down.
    pub fn ensure_exists(
        &mut self,
        primary: &HookedCore,
        temp_root: &Path,
    ) -> Result<(), RunAheadError> {
        if self.exists() {
            return Ok(());
        }

        match self.provision(primary, temp_root) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!("{}", e);
                self.destroy();
                Err(e)
            }
        }
    }

    /// Load a state taken from the primary instance
    pub fn load_state(&mut self, state: &SerializedState, av: &AvGate) -> Result<(), RunAheadError> {
        let instance = self
            .instance
            .as_mut()
            .ok_or(RunAheadError::DeserializeFailure)?;

        let _fast = av.fast_savestate(SavestateContext::RunaheadSameBinary);
        if instance.unserialize(state.as_bytes()) {
            Ok(())
        } else {
            Err(RunAheadError::DeserializeFailure)
        }
    }

    /// Run one frame fed with the last known input
    pub fn run_with_last_input(&mut self, tracker: &Rc<InputTracker>) {
        if let Some(instance) = self.instance.as_mut() {
            run_with_last_input(instance.as_mut(), tracker);
        }
    }

    /// Unload, deinit, close the module and delete the library copy.
    /// Safe to call when nothing was provisioned.
    pub fn destroy(&mut self) {
        if let Some(mut instance) = self.instance.take() {
            if self.game_loaded {
                instance.unload_game();
            }
            if self.initialized {
                instance.deinit();
            }
            drop(instance);
            tracing::info!("Secondary core instance destroyed");
        }
        self.initialized = false;
        self.game_loaded = false;
        self.mirrored_ports = [None; MAX_PORTS];

        if let Some(path) = self.temp_path.take() {
            match fs::remove_file(&path) {
                Ok(()) => tracing::debug!("Removed {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

impl Drop for SecondaryCore {
    fn drop(&mut self) {
        self.destroy();
    }
}
