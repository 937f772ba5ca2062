//! Libretro core loader
//!
//! Opens a core's shared library, resolves the `retro_*` entry points and
//! exposes them through [`CoreInstance`].
//!
//! Libretro callbacks are plain C function pointers with no user data, so
//! every core is handed the same set of trampolines. Each call into a core
//! pushes that instance's [`CoreCallbacks`] onto a thread-local stack for the
//! duration of the call and the trampolines dispatch to the top entry. Two
//! instances of the same core therefore never see each other's callbacks.

use libloading::Library;
use oc_core::{
    AvEnable, CoreCallbacks, CoreInstance, CoreLoader, EnvironmentRequest, GameInfo, LoaderError,
    SavestateContext, VideoFrame,
};
use std::cell::RefCell;
use std::ffi::{c_char, c_int, c_uint, c_void, CStr, CString};
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace};

/// Libretro API version this frontend speaks
pub const RETRO_API_VERSION: u32 = 1;

const EXPERIMENTAL: c_uint = 0x10000;

pub const ENVIRONMENT_GET_CAN_DUPE: c_uint = 3;
pub const ENVIRONMENT_SET_PIXEL_FORMAT: c_uint = 10;
pub const ENVIRONMENT_GET_VARIABLE_UPDATE: c_uint = 17;
pub const ENVIRONMENT_GET_AUDIO_VIDEO_ENABLE: c_uint = 47 | EXPERIMENTAL;
pub const ENVIRONMENT_GET_SAVESTATE_CONTEXT: c_uint = 72 | EXPERIMENTAL;

type EnvironmentT = unsafe extern "C" fn(cmd: c_uint, data: *mut c_void) -> bool;
type VideoRefreshT =
    unsafe extern "C" fn(data: *const c_void, width: c_uint, height: c_uint, pitch: usize);
type AudioSampleT = unsafe extern "C" fn(left: i16, right: i16);
type AudioSampleBatchT = unsafe extern "C" fn(data: *const i16, frames: usize) -> usize;
type InputPollT = unsafe extern "C" fn();
type InputStateT =
    unsafe extern "C" fn(port: c_uint, device: c_uint, index: c_uint, id: c_uint) -> i16;

/// `struct retro_game_info`
#[repr(C)]
struct RetroGameInfo {
    path: *const c_char,
    data: *const c_void,
    size: usize,
    meta: *const c_char,
}

/// `struct retro_system_info`
#[repr(C)]
struct RetroSystemInfo {
    library_name: *const c_char,
    library_version: *const c_char,
    valid_extensions: *const c_char,
    need_fullpath: bool,
    block_extract: bool,
}

impl Default for RetroSystemInfo {
    fn default() -> Self {
        Self {
            library_name: std::ptr::null(),
            library_version: std::ptr::null(),
            valid_extensions: std::ptr::null(),
            need_fullpath: false,
            block_extract: false,
        }
    }
}

/// What a core reports about itself
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemInfo {
    pub library_name: String,
    pub library_version: String,
    /// Extensions separated by `|`
    pub valid_extensions: String,
    /// The core loads content from its path and wants no data buffer
    pub need_fullpath: bool,
    pub block_extract: bool,
}

/// Resolved entry points
#[derive(Clone, Copy)]
struct RetroApi {
    api_version: unsafe extern "C" fn() -> c_uint,
    get_system_info: unsafe extern "C" fn(info: *mut RetroSystemInfo),
    init: unsafe extern "C" fn(),
    deinit: unsafe extern "C" fn(),
    set_environment: unsafe extern "C" fn(EnvironmentT),
    set_video_refresh: unsafe extern "C" fn(VideoRefreshT),
    set_audio_sample: unsafe extern "C" fn(AudioSampleT),
    set_audio_sample_batch: unsafe extern "C" fn(AudioSampleBatchT),
    set_input_poll: unsafe extern "C" fn(InputPollT),
    set_input_state: unsafe extern "C" fn(InputStateT),
    set_controller_port_device: unsafe extern "C" fn(port: c_uint, device: c_uint),
    reset: unsafe extern "C" fn(),
    run: unsafe extern "C" fn(),
    serialize_size: unsafe extern "C" fn() -> usize,
    serialize: unsafe extern "C" fn(data: *mut c_void, size: usize) -> bool,
    unserialize: unsafe extern "C" fn(data: *const c_void, size: usize) -> bool,
    load_game: unsafe extern "C" fn(game: *const RetroGameInfo) -> bool,
    unload_game: unsafe extern "C" fn(),
}

unsafe fn load_symbol<T: Copy>(lib: &Library, symbol: &'static str) -> Result<T, LoaderError> {
    let sym: libloading::Symbol<T> = lib
        .get(symbol.as_bytes())
        .map_err(|_| LoaderError::MissingSymbol(symbol.to_string()))?;
    Ok(*sym)
}

impl RetroApi {
    unsafe fn load(lib: &Library) -> Result<Self, LoaderError> {
        Ok(Self {
            api_version: load_symbol(lib, "retro_api_version")?,
            get_system_info: load_symbol(lib, "retro_get_system_info")?,
            init: load_symbol(lib, "retro_init")?,
            deinit: load_symbol(lib, "retro_deinit")?,
            set_environment: load_symbol(lib, "retro_set_environment")?,
            set_video_refresh: load_symbol(lib, "retro_set_video_refresh")?,
            set_audio_sample: load_symbol(lib, "retro_set_audio_sample")?,
            set_audio_sample_batch: load_symbol(lib, "retro_set_audio_sample_batch")?,
            set_input_poll: load_symbol(lib, "retro_set_input_poll")?,
            set_input_state: load_symbol(lib, "retro_set_input_state")?,
            set_controller_port_device: load_symbol(lib, "retro_set_controller_port_device")?,
            reset: load_symbol(lib, "retro_reset")?,
            run: load_symbol(lib, "retro_run")?,
            serialize_size: load_symbol(lib, "retro_serialize_size")?,
            serialize: load_symbol(lib, "retro_serialize")?,
            unserialize: load_symbol(lib, "retro_unserialize")?,
            load_game: load_symbol(lib, "retro_load_game")?,
            unload_game: load_symbol(lib, "retro_unload_game")?,
        })
    }
}

thread_local! {
    static ACTIVE: RefCell<Vec<CoreCallbacks>> = const { RefCell::new(Vec::new()) };
}

/// Makes an instance's callbacks the ones the trampolines dispatch to
struct ActiveScope;

impl ActiveScope {
    fn enter(callbacks: &CoreCallbacks) -> Self {
        ACTIVE.with(|active| active.borrow_mut().push(callbacks.clone()));
        ActiveScope
    }
}

impl Drop for ActiveScope {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            active.borrow_mut().pop();
        });
    }
}

/// Clone one callback out of the active set so it can run without the
/// stack borrowed.
fn active<T>(select: impl FnOnce(&CoreCallbacks) -> Option<T>) -> Option<T> {
    ACTIVE.with(|active| active.borrow().last().and_then(select))
}

unsafe extern "C" fn environment_trampoline(cmd: c_uint, data: *mut c_void) -> bool {
    match cmd {
        ENVIRONMENT_SET_PIXEL_FORMAT => return true,
        ENVIRONMENT_GET_CAN_DUPE => {
            if data.is_null() {
                return false;
            }
            *(data as *mut bool) = true;
            return true;
        }
        _ => {}
    }

    let Some(environment) = active(|c| c.environment.clone()) else {
        return false;
    };

    match cmd {
        ENVIRONMENT_GET_VARIABLE_UPDATE => {
            if data.is_null() {
                return false;
            }
            let mut updated = false;
            let handled = environment(EnvironmentRequest::VariableUpdate(&mut updated));
            *(data as *mut bool) = handled && updated;
            handled
        }
        ENVIRONMENT_GET_AUDIO_VIDEO_ENABLE => {
            if data.is_null() {
                return false;
            }
            let mut flags = AvEnable::empty();
            if !environment(EnvironmentRequest::AudioVideoEnable(&mut flags)) {
                return false;
            }
            *(data as *mut c_int) = flags.bits() as c_int;
            true
        }
        ENVIRONMENT_GET_SAVESTATE_CONTEXT => {
            if data.is_null() {
                return false;
            }
            let mut context = SavestateContext::Normal;
            if !environment(EnvironmentRequest::SavestateContext(&mut context)) {
                return false;
            }
            *(data as *mut c_int) = context as c_int;
            true
        }
        other => {
            trace!("Unhandled environment command {:#x}", other);
            environment(EnvironmentRequest::Other(other))
        }
    }
}

unsafe extern "C" fn video_refresh_trampoline(
    data: *const c_void,
    width: c_uint,
    height: c_uint,
    pitch: usize,
) {
    let Some(video) = active(|c| c.video_refresh.clone()) else {
        return;
    };
    let bytes = if data.is_null() {
        None
    } else {
        Some(std::slice::from_raw_parts(
            data as *const u8,
            pitch * height as usize,
        ))
    };
    video(VideoFrame {
        data: bytes,
        width,
        height,
        pitch,
    });
}

unsafe extern "C" fn audio_sample_trampoline(left: i16, right: i16) {
    if let Some(audio) = active(|c| c.audio_sample_batch.clone()) {
        audio(&[left, right]);
    }
}

unsafe extern "C" fn audio_sample_batch_trampoline(data: *const i16, frames: usize) -> usize {
    let Some(audio) = active(|c| c.audio_sample_batch.clone()) else {
        return frames;
    };
    if data.is_null() {
        return 0;
    }
    let samples = std::slice::from_raw_parts(data, frames * 2);
    audio(samples) / 2
}

unsafe extern "C" fn input_poll_trampoline() {
    if let Some(poll) = active(|c| c.input_poll.clone()) {
        poll();
    }
}

unsafe extern "C" fn input_state_trampoline(
    port: c_uint,
    device: c_uint,
    index: c_uint,
    id: c_uint,
) -> i16 {
    active(|c| c.input_state.clone()).map_or(0, |state| state(port, device, index, id))
}

/// Buffers `retro_game_info` points into, kept alive until unload
struct LoadedGame {
    _path: Option<CString>,
    _meta: Option<CString>,
    _data: Option<Vec<u8>>,
}

/// A loaded libretro core
pub struct LibretroCore {
    api: RetroApi,
    path: PathBuf,
    info: SystemInfo,
    callbacks: CoreCallbacks,
    game: Option<LoadedGame>,
    // Dropped last so the entry points stay valid for the other fields
    _library: Library,
}

fn c_string_lossy(ptr: *const c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    // SAFETY: libretro strings are NUL-terminated and static for the
    // lifetime of the library
    unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned()
}

impl LibretroCore {
    /// Open the library at `path` and wire up the callbacks
    pub fn open(path: &Path) -> Result<Self, LoaderError> {
        let open_error = |message: String| LoaderError::LibraryOpen {
            path: path.display().to_string(),
            message,
        };

        // SAFETY: loading a libretro core runs its initializers, which is the
        // contract of a core library
        let library = unsafe { Library::new(path) }.map_err(|e| open_error(e.to_string()))?;
        let api = unsafe { RetroApi::load(&library) }?;

        let version = unsafe { (api.api_version)() };
        if version != RETRO_API_VERSION {
            return Err(LoaderError::ApiVersionMismatch {
                expected: RETRO_API_VERSION,
                found: version,
            });
        }

        let mut raw_info = RetroSystemInfo::default();
        unsafe { (api.get_system_info)(&mut raw_info) };
        let info = SystemInfo {
            library_name: c_string_lossy(raw_info.library_name),
            library_version: c_string_lossy(raw_info.library_version),
            valid_extensions: c_string_lossy(raw_info.valid_extensions),
            need_fullpath: raw_info.need_fullpath,
            block_extract: raw_info.block_extract,
        };

        let core = Self {
            api,
            path: path.to_path_buf(),
            info,
            callbacks: CoreCallbacks::default(),
            game: None,
            _library: library,
        };

        core.with_callbacks(|api| unsafe {
            (api.set_environment)(environment_trampoline);
            (api.set_video_refresh)(video_refresh_trampoline);
            (api.set_audio_sample)(audio_sample_trampoline);
            (api.set_audio_sample_batch)(audio_sample_batch_trampoline);
            (api.set_input_poll)(input_poll_trampoline);
            (api.set_input_state)(input_state_trampoline);
        });

        info!(
            "Loaded core {} {} from {}",
            core.info.library_name,
            core.info.library_version,
            path.display()
        );
        Ok(core)
    }

    pub fn system_info(&self) -> &SystemInfo {
        &self.info
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Call into the core with this instance's callbacks active
    fn with_callbacks<R>(&self, f: impl FnOnce(&RetroApi) -> R) -> R {
        let _scope = ActiveScope::enter(&self.callbacks);
        f(&self.api)
    }
}

impl CoreInstance for LibretroCore {
    fn init(&mut self) {
        self.with_callbacks(|api| unsafe { (api.init)() })
    }

    fn deinit(&mut self) {
        self.with_callbacks(|api| unsafe { (api.deinit)() })
    }

    fn load_game(&mut self, game: Option<&GameInfo>) -> bool {
        let Some(game) = game else {
            debug!("Loading core without content");
            return self.with_callbacks(|api| unsafe { (api.load_game)(std::ptr::null()) });
        };

        let path = match &game.path {
            Some(path) => match CString::new(path.to_string_lossy().into_owned()) {
                Ok(path) => Some(path),
                Err(_) => return false,
            },
            None => None,
        };
        let meta = match &game.meta {
            Some(meta) => match CString::new(meta.as_str()) {
                Ok(meta) => Some(meta),
                Err(_) => return false,
            },
            None => None,
        };
        let data = game.data.clone();

        let raw = RetroGameInfo {
            path: path.as_ref().map_or(std::ptr::null(), |p| p.as_ptr()),
            data: data
                .as_ref()
                .map_or(std::ptr::null(), |d| d.as_ptr() as *const c_void),
            size: data.as_ref().map_or(0, |d| d.len()),
            meta: meta.as_ref().map_or(std::ptr::null(), |m| m.as_ptr()),
        };

        let loaded = self.with_callbacks(|api| unsafe { (api.load_game)(&raw) });
        if loaded {
            self.game = Some(LoadedGame {
                _path: path,
                _meta: meta,
                _data: data,
            });
        }
        loaded
    }

    fn unload_game(&mut self) {
        self.with_callbacks(|api| unsafe { (api.unload_game)() });
        self.game = None;
    }

    fn run(&mut self) {
        self.with_callbacks(|api| unsafe { (api.run)() })
    }

    fn reset(&mut self) {
        self.with_callbacks(|api| unsafe { (api.reset)() })
    }

    fn serialize_size(&mut self) -> usize {
        self.with_callbacks(|api| unsafe { (api.serialize_size)() })
    }

    fn serialize(&mut self, data: &mut [u8]) -> bool {
        self.with_callbacks(|api| unsafe {
            (api.serialize)(data.as_mut_ptr() as *mut c_void, data.len())
        })
    }

    fn unserialize(&mut self, data: &[u8]) -> bool {
        self.with_callbacks(|api| unsafe {
            (api.unserialize)(data.as_ptr() as *const c_void, data.len())
        })
    }

    fn set_controller_port_device(&mut self, port: u32, device: u32) {
        self.with_callbacks(|api| unsafe { (api.set_controller_port_device)(port, device) })
    }

    fn callbacks(&self) -> &CoreCallbacks {
        &self.callbacks
    }

    fn set_callbacks(&mut self, callbacks: CoreCallbacks) {
        self.callbacks = callbacks;
    }
}

/// [`CoreLoader`] for libretro shared libraries
#[derive(Debug, Default, Clone, Copy)]
pub struct LibretroLoader;

impl LibretroLoader {
    pub fn new() -> Self {
        Self
    }
}

impl CoreLoader for LibretroLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn CoreInstance>, LoaderError> {
        Ok(Box::new(LibretroCore::open(path)?))
    }
}
