//! # UHD Driver for USRP Devices
//!
//! This module provides hardware support for Ettus Research USRP devices
//! via the USRP Hardware Driver (UHD) C API.
//!
//! libuhd is loaded at runtime with `libloading` when the crate is built
//! with the `uhd` feature, so the same binary runs on machines without UHD
//! installed (the driver then reports itself unavailable).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lotune_hal::hal::{DriverRegistry, uhd::UhdDriver};
//!
//! let mut registry = DriverRegistry::new();
//! registry.register(Box::new(UhdDriver::new()));
//!
//! // Create B200
//! let mut device = registry.create("uhd://type=b200")?;
//!
//! // Or create N210 by IP (bare args default to UHD)
//! let mut device = registry.create("addr=192.168.10.2")?;
//! ```

use super::{parse_args, DeviceDriver};
use crate::device::{DeviceInfo, RadioDevice, SdrError, SdrResult};
#[cfg(not(feature = "uhd"))]
use tracing::warn;

// =============================================================================
// UHD FFI Bindings
// =============================================================================

/// Runtime-loaded bindings to the libuhd C API.
#[cfg(feature = "uhd")]
mod uhd_ffi {
    use libloading::Library;
    use std::ffi::{c_char, c_double, c_int, c_void, CStr};
    use std::sync::OnceLock;

    /// UHD error codes
    pub const UHD_ERROR_NONE: c_int = 0;

    /// `uhd_sensor_value_data_type_t` values
    pub const UHD_SENSOR_VALUE_BOOLEAN: c_int = 98;
    pub const UHD_SENSOR_VALUE_INTEGER: c_int = 105;
    pub const UHD_SENSOR_VALUE_REALNUM: c_int = 114;

    /// Size of string buffers handed to the C API.
    pub const STRBUF_LEN: usize = 4096;

    /// Opaque handle to a USRP device
    pub type UhdUsrpHandle = *mut c_void;
    pub type UhdStringVectorHandle = *mut c_void;
    pub type UhdSensorValueHandle = *mut c_void;
    pub type UhdSubdevSpecHandle = *mut c_void;

    /// `uhd_tune_request_t`
    #[repr(C)]
    pub struct UhdTuneRequest {
        pub target_freq: c_double,
        pub rf_freq_policy: c_int,
        pub rf_freq: c_double,
        pub dsp_freq_policy: c_int,
        pub dsp_freq: c_double,
        pub args: *mut c_char,
    }

    /// `uhd_tune_result_t`
    #[repr(C)]
    #[derive(Debug, Default, Clone, Copy)]
    pub struct UhdTuneResult {
        pub clipped_rf_freq: c_double,
        pub target_rf_freq: c_double,
        pub actual_rf_freq: c_double,
        pub target_dsp_freq: c_double,
        pub actual_dsp_freq: c_double,
    }

    type StrOut<H> = unsafe extern "C" fn(H, *mut c_char, usize) -> c_int;
    type NamedOnIndex = unsafe extern "C" fn(UhdUsrpHandle, *const c_char, usize) -> c_int;
    type TimeOnIndex = unsafe extern "C" fn(UhdUsrpHandle, i64, c_double, usize) -> c_int;
    type NamesOnIndex =
        unsafe extern "C" fn(UhdUsrpHandle, usize, *mut UhdStringVectorHandle) -> c_int;
    type SensorOnIndex = unsafe extern "C" fn(
        UhdUsrpHandle,
        *const c_char,
        usize,
        *mut UhdSensorValueHandle,
    ) -> c_int;

    /// Loaded libuhd and the entry points we use.
    pub struct UhdLib {
        _lib: Library,

        pub usrp_find: unsafe extern "C" fn(*const c_char, *mut UhdStringVectorHandle) -> c_int,
        pub usrp_make: unsafe extern "C" fn(*mut UhdUsrpHandle, *const c_char) -> c_int,
        pub usrp_free: unsafe extern "C" fn(*mut UhdUsrpHandle) -> c_int,
        pub usrp_last_error: StrOut<UhdUsrpHandle>,
        pub get_last_error: unsafe extern "C" fn(*mut c_char, usize) -> c_int,
        pub get_pp_string: StrOut<UhdUsrpHandle>,

        pub set_clock_source: NamedOnIndex,
        pub set_time_source: NamedOnIndex,
        pub set_time_now: TimeOnIndex,
        pub set_time_next_pps: TimeOnIndex,
        pub get_time_now:
            unsafe extern "C" fn(UhdUsrpHandle, usize, *mut i64, *mut c_double) -> c_int,
        pub set_command_time: TimeOnIndex,
        pub clear_command_time: unsafe extern "C" fn(UhdUsrpHandle, usize) -> c_int,

        pub set_rx_freq: unsafe extern "C" fn(
            UhdUsrpHandle,
            *mut UhdTuneRequest,
            usize,
            *mut UhdTuneResult,
        ) -> c_int,
        pub get_rx_freq: unsafe extern "C" fn(UhdUsrpHandle, usize, *mut c_double) -> c_int,
        pub set_rx_antenna: NamedOnIndex,
        pub get_rx_antennas: NamesOnIndex,
        pub set_rx_subdev_spec:
            unsafe extern "C" fn(UhdUsrpHandle, UhdSubdevSpecHandle, usize) -> c_int,
        pub subdev_spec_make:
            unsafe extern "C" fn(*mut UhdSubdevSpecHandle, *const c_char) -> c_int,
        pub subdev_spec_free: unsafe extern "C" fn(*mut UhdSubdevSpecHandle) -> c_int,

        pub get_rx_sensor_names: NamesOnIndex,
        pub get_rx_sensor: SensorOnIndex,
        pub get_mboard_sensor_names: NamesOnIndex,
        pub get_mboard_sensor: SensorOnIndex,
        pub sensor_value_make: unsafe extern "C" fn(*mut UhdSensorValueHandle) -> c_int,
        pub sensor_value_free: unsafe extern "C" fn(*mut UhdSensorValueHandle) -> c_int,
        pub sensor_value_data_type:
            unsafe extern "C" fn(UhdSensorValueHandle, *mut c_int) -> c_int,
        pub sensor_value_to_bool: unsafe extern "C" fn(UhdSensorValueHandle, *mut bool) -> c_int,
        pub sensor_value_to_int: unsafe extern "C" fn(UhdSensorValueHandle, *mut c_int) -> c_int,
        pub sensor_value_to_realnum:
            unsafe extern "C" fn(UhdSensorValueHandle, *mut c_double) -> c_int,
        pub sensor_value_name: StrOut<UhdSensorValueHandle>,
        pub sensor_value_value: StrOut<UhdSensorValueHandle>,
        pub sensor_value_unit: StrOut<UhdSensorValueHandle>,

        pub string_vector_make: unsafe extern "C" fn(*mut UhdStringVectorHandle) -> c_int,
        pub string_vector_free: unsafe extern "C" fn(*mut UhdStringVectorHandle) -> c_int,
        pub string_vector_size: unsafe extern "C" fn(UhdStringVectorHandle, *mut usize) -> c_int,
        pub string_vector_at:
            unsafe extern "C" fn(UhdStringVectorHandle, usize, *mut c_char, usize) -> c_int,

        pub set_gpio_attr: unsafe extern "C" fn(
            UhdUsrpHandle,
            *const c_char,
            *const c_char,
            u32,
            u32,
            usize,
        ) -> c_int,
        pub get_gpio_attr: unsafe extern "C" fn(
            UhdUsrpHandle,
            *const c_char,
            *const c_char,
            usize,
            *mut u32,
        ) -> c_int,
    }

    /// Global library instance (loaded once).
    static UHD_LIB: OnceLock<Option<UhdLib>> = OnceLock::new();

    /// Library names to try on different platforms.
    #[cfg(target_os = "linux")]
    const LIB_NAMES: &[&str] = &["libuhd.so.4.6.0", "libuhd.so.4", "libuhd.so"];

    #[cfg(target_os = "macos")]
    const LIB_NAMES: &[&str] = &["libuhd.dylib", "libuhd.4.dylib"];

    #[cfg(target_os = "windows")]
    const LIB_NAMES: &[&str] = &["uhd.dll"];

    /// Copy one symbol out of the library.
    ///
    /// # Safety
    /// `T` must match the C signature of `name`.
    unsafe fn symbol<T: Copy>(lib: &Library, name: &[u8]) -> Option<T> {
        lib.get::<T>(name).ok().map(|s| *s)
    }

    fn load_library() -> Option<UhdLib> {
        for name in LIB_NAMES {
            let Ok(lib) = (unsafe { Library::new(name) }) else {
                continue;
            };
            // Function pointers stay valid while `_lib` lives in the same struct.
            let loaded = (move || unsafe {
                Some(UhdLib {
                    usrp_find: symbol(&lib, b"uhd_usrp_find\0")?,
                    usrp_make: symbol(&lib, b"uhd_usrp_make\0")?,
                    usrp_free: symbol(&lib, b"uhd_usrp_free\0")?,
                    usrp_last_error: symbol(&lib, b"uhd_usrp_last_error\0")?,
                    get_last_error: symbol(&lib, b"uhd_get_last_error\0")?,
                    get_pp_string: symbol(&lib, b"uhd_usrp_get_pp_string\0")?,
                    set_clock_source: symbol(&lib, b"uhd_usrp_set_clock_source\0")?,
                    set_time_source: symbol(&lib, b"uhd_usrp_set_time_source\0")?,
                    set_time_now: symbol(&lib, b"uhd_usrp_set_time_now\0")?,
                    set_time_next_pps: symbol(&lib, b"uhd_usrp_set_time_next_pps\0")?,
                    get_time_now: symbol(&lib, b"uhd_usrp_get_time_now\0")?,
                    set_command_time: symbol(&lib, b"uhd_usrp_set_command_time\0")?,
                    clear_command_time: symbol(&lib, b"uhd_usrp_clear_command_time\0")?,
                    set_rx_freq: symbol(&lib, b"uhd_usrp_set_rx_freq\0")?,
                    get_rx_freq: symbol(&lib, b"uhd_usrp_get_rx_freq\0")?,
                    set_rx_antenna: symbol(&lib, b"uhd_usrp_set_rx_antenna\0")?,
                    get_rx_antennas: symbol(&lib, b"uhd_usrp_get_rx_antennas\0")?,
                    set_rx_subdev_spec: symbol(&lib, b"uhd_usrp_set_rx_subdev_spec\0")?,
                    subdev_spec_make: symbol(&lib, b"uhd_subdev_spec_make\0")?,
                    subdev_spec_free: symbol(&lib, b"uhd_subdev_spec_free\0")?,
                    get_rx_sensor_names: symbol(&lib, b"uhd_usrp_get_rx_sensor_names\0")?,
                    get_rx_sensor: symbol(&lib, b"uhd_usrp_get_rx_sensor\0")?,
                    get_mboard_sensor_names: symbol(&lib, b"uhd_usrp_get_mboard_sensor_names\0")?,
                    get_mboard_sensor: symbol(&lib, b"uhd_usrp_get_mboard_sensor\0")?,
                    sensor_value_make: symbol(&lib, b"uhd_sensor_value_make\0")?,
                    sensor_value_free: symbol(&lib, b"uhd_sensor_value_free\0")?,
                    sensor_value_data_type: symbol(&lib, b"uhd_sensor_value_data_type\0")?,
                    sensor_value_to_bool: symbol(&lib, b"uhd_sensor_value_to_bool\0")?,
                    sensor_value_to_int: symbol(&lib, b"uhd_sensor_value_to_int\0")?,
                    sensor_value_to_realnum: symbol(&lib, b"uhd_sensor_value_to_realnum\0")?,
                    sensor_value_name: symbol(&lib, b"uhd_sensor_value_name\0")?,
                    sensor_value_value: symbol(&lib, b"uhd_sensor_value_value\0")?,
                    sensor_value_unit: symbol(&lib, b"uhd_sensor_value_unit\0")?,
                    string_vector_make: symbol(&lib, b"uhd_string_vector_make\0")?,
                    string_vector_free: symbol(&lib, b"uhd_string_vector_free\0")?,
                    string_vector_size: symbol(&lib, b"uhd_string_vector_size\0")?,
                    string_vector_at: symbol(&lib, b"uhd_string_vector_at\0")?,
                    set_gpio_attr: symbol(&lib, b"uhd_usrp_set_gpio_attr\0")?,
                    get_gpio_attr: symbol(&lib, b"uhd_usrp_get_gpio_attr\0")?,
                    _lib: lib,
                })
            })();

            if loaded.is_some() {
                tracing::info!("Loaded UHD library: {}", name);
                return loaded;
            }
            tracing::debug!("{} is missing required UHD symbols", name);
        }
        tracing::debug!("UHD library not found");
        None
    }

    /// Get the loaded library, initializing if necessary.
    pub fn get_lib() -> Option<&'static UhdLib> {
        UHD_LIB.get_or_init(load_library).as_ref()
    }

    /// Check if libuhd is available.
    pub fn is_available() -> bool {
        get_lib().is_some()
    }

    /// Read a C string written by `fill` into a scratch buffer.
    pub fn read_string(fill: impl FnOnce(*mut c_char, usize) -> c_int) -> Result<String, c_int> {
        let mut buf = vec![0 as c_char; STRBUF_LEN];
        let code = fill(buf.as_mut_ptr(), buf.len());
        if code != UHD_ERROR_NONE {
            return Err(code);
        }
        // The API always NUL-terminates within the given length.
        let text = unsafe { CStr::from_ptr(buf.as_ptr()) };
        Ok(text.to_string_lossy().into_owned())
    }

    /// Process-wide last error string.
    pub fn last_error(lib: &UhdLib) -> String {
        read_string(|buf, len| unsafe { (lib.get_last_error)(buf, len) }).unwrap_or_default()
    }

    /// Owned `uhd_string_vector_handle`.
    pub struct StringVector {
        lib: &'static UhdLib,
        pub handle: UhdStringVectorHandle,
    }

    impl StringVector {
        pub fn new(lib: &'static UhdLib) -> Result<Self, c_int> {
            let mut handle: UhdStringVectorHandle = std::ptr::null_mut();
            let code = unsafe { (lib.string_vector_make)(&mut handle) };
            if code != UHD_ERROR_NONE {
                return Err(code);
            }
            Ok(Self { lib, handle })
        }

        pub fn to_vec(&self) -> Result<Vec<String>, c_int> {
            let mut size = 0usize;
            let code = unsafe { (self.lib.string_vector_size)(self.handle, &mut size) };
            if code != UHD_ERROR_NONE {
                return Err(code);
            }
            (0..size)
                .map(|i| {
                    read_string(|buf, len| unsafe {
                        (self.lib.string_vector_at)(self.handle, i, buf, len)
                    })
                })
                .collect()
        }
    }

    impl Drop for StringVector {
        fn drop(&mut self) {
            unsafe { (self.lib.string_vector_free)(&mut self.handle) };
        }
    }

    /// Owned `uhd_sensor_value_handle`.
    pub struct SensorHandle {
        lib: &'static UhdLib,
        pub handle: UhdSensorValueHandle,
    }

    impl SensorHandle {
        pub fn new(lib: &'static UhdLib) -> Result<Self, c_int> {
            let mut handle: UhdSensorValueHandle = std::ptr::null_mut();
            let code = unsafe { (lib.sensor_value_make)(&mut handle) };
            if code != UHD_ERROR_NONE {
                return Err(code);
            }
            Ok(Self { lib, handle })
        }
    }

    impl Drop for SensorHandle {
        fn drop(&mut self) {
            unsafe { (self.lib.sensor_value_free)(&mut self.handle) };
        }
    }

    /// Owned `uhd_subdev_spec_handle`.
    pub struct SubdevSpec {
        lib: &'static UhdLib,
        pub handle: UhdSubdevSpecHandle,
    }

    impl SubdevSpec {
        pub fn new(lib: &'static UhdLib, markup: *const c_char) -> Result<Self, c_int> {
            let mut handle: UhdSubdevSpecHandle = std::ptr::null_mut();
            let code = unsafe { (lib.subdev_spec_make)(&mut handle, markup) };
            if code != UHD_ERROR_NONE {
                return Err(code);
            }
            Ok(Self { lib, handle })
        }
    }

    impl Drop for SubdevSpec {
        fn drop(&mut self) {
            unsafe { (self.lib.subdev_spec_free)(&mut self.handle) };
        }
    }
}

// =============================================================================
// UHD Driver
// =============================================================================

/// UHD device driver for USRP hardware.
pub struct UhdDriver {
    /// Whether the UHD library is available
    library_available: bool,
}

impl UhdDriver {
    /// Create a new UHD driver instance.
    pub fn new() -> Self {
        Self {
            library_available: Self::check_library(),
        }
    }

    /// Check if the UHD library is available on this system.
    fn check_library() -> bool {
        #[cfg(feature = "uhd")]
        {
            uhd_ffi::is_available()
        }
        #[cfg(not(feature = "uhd"))]
        {
            false
        }
    }

    /// Whether libuhd could be loaded.
    pub fn is_available(&self) -> bool {
        self.library_available
    }
}

impl Default for UhdDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceDriver for UhdDriver {
    fn name(&self) -> &str {
        "uhd"
    }

    fn discover(&self) -> Vec<DeviceInfo> {
        #[cfg(feature = "uhd")]
        {
            match uhd_ffi::get_lib() {
                Some(lib) => usrp::find(lib, ""),
                None => Vec::new(),
            }
        }
        #[cfg(not(feature = "uhd"))]
        {
            warn!("UHD support not compiled in - cannot discover devices");
            Vec::new()
        }
    }

    fn create_from_string(&self, args: &str) -> SdrResult<Box<dyn RadioDevice>> {
        if !self.library_available {
            return Err(SdrError::HardwareError(
                "UHD library not available. Install libuhd and rebuild with --features uhd"
                    .to_string(),
            ));
        }

        let parsed = parse_args(args);
        tracing::debug!(?parsed, "Opening USRP");

        #[cfg(feature = "uhd")]
        {
            let device = usrp::UhdDevice::open(args)?;
            Ok(Box::new(device))
        }
        #[cfg(not(feature = "uhd"))]
        {
            Err(SdrError::Unsupported(format!(
                "UHD device '{}' requires the uhd feature",
                args
            )))
        }
    }
}

// =============================================================================
// UHD Device
// =============================================================================

#[cfg(feature = "uhd")]
pub use usrp::UhdDevice;

#[cfg(feature = "uhd")]
mod usrp {
    use super::uhd_ffi::{
        self, SensorHandle, StringVector, SubdevSpec, UhdLib, UhdTuneRequest, UhdTuneResult,
        UhdUsrpHandle, UHD_ERROR_NONE, UHD_SENSOR_VALUE_BOOLEAN, UHD_SENSOR_VALUE_INTEGER,
        UHD_SENSOR_VALUE_REALNUM,
    };
    use crate::device::{
        DeviceInfo, GpioAttr, RadioDevice, SdrError, SdrResult, SensorData, SensorValue,
        TuneRequest, TuneResult,
    };
    use crate::hal::parse_args;
    use lotune_core::config::ClockSource;
    use lotune_core::timing::TimeSpec;
    use std::ffi::{c_char, c_int, CString};
    use tracing::{debug, info};

    /// All calls address the first motherboard and RX channel.
    const MBOARD: usize = 0;
    const CHAN: usize = 0;

    fn cstring(value: &str) -> SdrResult<CString> {
        CString::new(value)
            .map_err(|_| SdrError::ConfigError(format!("NUL byte in argument: {:?}", value)))
    }

    /// Enumerate USRPs matching `hint`.
    pub fn find(lib: &'static UhdLib, hint: &str) -> Vec<DeviceInfo> {
        let Ok(hint) = CString::new(hint) else {
            return Vec::new();
        };
        let Ok(found) = StringVector::new(lib) else {
            return Vec::new();
        };
        let mut handle = found.handle;
        let code = unsafe { (lib.usrp_find)(hint.as_ptr(), &mut handle) };
        if code != UHD_ERROR_NONE {
            debug!(code, "uhd_usrp_find failed");
            return Vec::new();
        }
        found
            .to_vec()
            .unwrap_or_default()
            .into_iter()
            .map(|address| {
                let parsed = parse_args(&address);
                let field = |k: &str| parsed.get(k).cloned().unwrap_or_default();
                DeviceInfo {
                    driver: "uhd".to_string(),
                    serial: field("serial"),
                    label: field("product"),
                    address,
                }
            })
            .collect()
    }

    /// A USRP opened through libuhd.
    pub struct UhdDevice {
        lib: &'static UhdLib,
        handle: UhdUsrpHandle,
        args: String,
    }

    // The handle is only ever used through `&mut self` or `&self` on one thread at a time.
    unsafe impl Send for UhdDevice {}

    impl UhdDevice {
        /// Open the device described by UHD address `args`.
        pub fn open(args: &str) -> SdrResult<Self> {
            let lib = uhd_ffi::get_lib().ok_or_else(|| {
                SdrError::HardwareError("UHD library not available".to_string())
            })?;
            let cargs = cstring(args)?;
            let mut handle: UhdUsrpHandle = std::ptr::null_mut();
            let code = unsafe { (lib.usrp_make)(&mut handle, cargs.as_ptr()) };
            if code != UHD_ERROR_NONE || handle.is_null() {
                return Err(SdrError::DeviceNotFound(format!(
                    "uhd_usrp_make('{}') failed (code {}): {}",
                    args,
                    code,
                    uhd_ffi::last_error(lib)
                )));
            }
            info!(args, "Opened USRP");
            Ok(Self {
                lib,
                handle,
                args: args.to_string(),
            })
        }

        /// Address args this device was opened with.
        pub fn args(&self) -> &str {
            &self.args
        }

        fn check(&self, code: c_int, what: &str) -> SdrResult<()> {
            if code == UHD_ERROR_NONE {
                return Ok(());
            }
            let detail = uhd_ffi::read_string(|buf, len| unsafe {
                (self.lib.usrp_last_error)(self.handle, buf, len)
            })
            .unwrap_or_default();
            Err(SdrError::HardwareError(format!(
                "{} failed (code {}): {}",
                what, code, detail
            )))
        }

        fn names(
            &self,
            getter: unsafe extern "C" fn(
                UhdUsrpHandle,
                usize,
                *mut uhd_ffi::UhdStringVectorHandle,
            ) -> c_int,
            index: usize,
            what: &str,
        ) -> SdrResult<Vec<String>> {
            let vector = StringVector::new(self.lib).map_err(|c| self.code_error(c, what))?;
            let mut handle = vector.handle;
            self.check(unsafe { getter(self.handle, index, &mut handle) }, what)?;
            vector.to_vec().map_err(|c| self.code_error(c, what))
        }

        fn sensor(
            &self,
            getter: unsafe extern "C" fn(
                UhdUsrpHandle,
                *const c_char,
                usize,
                *mut uhd_ffi::UhdSensorValueHandle,
            ) -> c_int,
            name: &str,
            index: usize,
        ) -> SdrResult<SensorValue> {
            let what = format!("read sensor {}", name);
            let cname = cstring(name)?;
            let sensor = SensorHandle::new(self.lib).map_err(|c| self.code_error(c, &what))?;
            let mut handle = sensor.handle;
            self.check(
                unsafe { getter(self.handle, cname.as_ptr(), index, &mut handle) },
                &what,
            )?;
            self.sensor_value(handle)
                .map_err(|c| self.code_error(c, &what))
        }

        fn sensor_value(&self, handle: uhd_ffi::UhdSensorValueHandle) -> Result<SensorValue, c_int> {
            let lib = self.lib;
            let name = uhd_ffi::read_string(|b, l| unsafe { (lib.sensor_value_name)(handle, b, l) })?;
            let unit = uhd_ffi::read_string(|b, l| unsafe { (lib.sensor_value_unit)(handle, b, l) })?;
            let mut kind: c_int = 0;
            let code = unsafe { (lib.sensor_value_data_type)(handle, &mut kind) };
            if code != UHD_ERROR_NONE {
                return Err(code);
            }

            let data = match kind {
                UHD_SENSOR_VALUE_BOOLEAN => {
                    let mut value = false;
                    match unsafe { (lib.sensor_value_to_bool)(handle, &mut value) } {
                        UHD_ERROR_NONE => SensorData::Boolean(value),
                        code => return Err(code),
                    }
                }
                UHD_SENSOR_VALUE_INTEGER => {
                    let mut value: c_int = 0;
                    match unsafe { (lib.sensor_value_to_int)(handle, &mut value) } {
                        UHD_ERROR_NONE => SensorData::Integer(value as i64),
                        code => return Err(code),
                    }
                }
                UHD_SENSOR_VALUE_REALNUM => {
                    let mut value = 0.0;
                    match unsafe { (lib.sensor_value_to_realnum)(handle, &mut value) } {
                        UHD_ERROR_NONE => SensorData::Real(value),
                        code => return Err(code),
                    }
                }
                _ => SensorData::Text(uhd_ffi::read_string(|b, l| unsafe {
                    (lib.sensor_value_value)(handle, b, l)
                })?),
            };

            Ok(SensorValue { name, data, unit })
        }

        fn code_error(&self, code: c_int, what: &str) -> SdrError {
            SdrError::HardwareError(format!(
                "{} failed (code {}): {}",
                what,
                code,
                uhd_ffi::last_error(self.lib)
            ))
        }
    }

    impl Drop for UhdDevice {
        fn drop(&mut self) {
            let code = unsafe { (self.lib.usrp_free)(&mut self.handle) };
            if code != UHD_ERROR_NONE {
                debug!(code, "uhd_usrp_free failed");
            }
        }
    }

    impl RadioDevice for UhdDevice {
        fn pp_string(&self) -> SdrResult<String> {
            uhd_ffi::read_string(|buf, len| unsafe {
                (self.lib.get_pp_string)(self.handle, buf, len)
            })
            .map_err(|c| self.code_error(c, "get pp string"))
        }

        fn set_clock_source(&mut self, source: ClockSource) -> SdrResult<()> {
            let csource = cstring(source.as_str())?;
            let code = unsafe { (self.lib.set_clock_source)(self.handle, csource.as_ptr(), MBOARD) };
            self.check(code, "set clock source")
        }

        fn set_time_source(&mut self, source: &str) -> SdrResult<()> {
            let csource = cstring(source)?;
            let code = unsafe { (self.lib.set_time_source)(self.handle, csource.as_ptr(), MBOARD) };
            self.check(code, "set time source")
        }

        fn set_time_now(&mut self, time: TimeSpec) -> SdrResult<()> {
            let code = unsafe {
                (self.lib.set_time_now)(self.handle, time.full_secs(), time.frac_secs(), MBOARD)
            };
            self.check(code, "set time now")
        }

        fn set_time_next_pps(&mut self, time: TimeSpec) -> SdrResult<()> {
            let code = unsafe {
                (self.lib.set_time_next_pps)(self.handle, time.full_secs(), time.frac_secs(), MBOARD)
            };
            self.check(code, "set time next pps")
        }

        fn time_now(&mut self) -> SdrResult<TimeSpec> {
            let mut full: i64 = 0;
            let mut frac: f64 = 0.0;
            let code = unsafe { (self.lib.get_time_now)(self.handle, MBOARD, &mut full, &mut frac) };
            self.check(code, "get time now")?;
            Ok(TimeSpec::new(full, frac))
        }

        fn set_command_time(&mut self, time: TimeSpec) -> SdrResult<()> {
            let code = unsafe {
                (self.lib.set_command_time)(self.handle, time.full_secs(), time.frac_secs(), MBOARD)
            };
            self.check(code, "set command time")
        }

        fn clear_command_time(&mut self) -> SdrResult<()> {
            let code = unsafe { (self.lib.clear_command_time)(self.handle, MBOARD) };
            self.check(code, "clear command time")
        }

        fn set_rx_freq(&mut self, request: &TuneRequest) -> SdrResult<TuneResult> {
            let args = cstring(&request.args)?;
            let mut req = UhdTuneRequest {
                target_freq: request.target_freq,
                rf_freq_policy: request.rf_freq_policy.code() as c_int,
                rf_freq: request.rf_freq,
                dsp_freq_policy: request.dsp_freq_policy.code() as c_int,
                dsp_freq: request.dsp_freq,
                // The C API takes `char*` but does not write through it.
                args: args.as_ptr() as *mut c_char,
            };
            let mut result = UhdTuneResult::default();
            let code = unsafe { (self.lib.set_rx_freq)(self.handle, &mut req, CHAN, &mut result) };
            self.check(code, "set rx freq")?;
            Ok(TuneResult {
                clipped_rf_freq: result.clipped_rf_freq,
                target_rf_freq: result.target_rf_freq,
                actual_rf_freq: result.actual_rf_freq,
                target_dsp_freq: result.target_dsp_freq,
                actual_dsp_freq: result.actual_dsp_freq,
            })
        }

        fn rx_freq(&mut self) -> SdrResult<f64> {
            let mut freq = 0.0;
            let code = unsafe { (self.lib.get_rx_freq)(self.handle, CHAN, &mut freq) };
            self.check(code, "get rx freq")?;
            Ok(freq)
        }

        fn set_rx_subdev_spec(&mut self, spec: &str) -> SdrResult<()> {
            let markup = cstring(spec)?;
            let subdev = SubdevSpec::new(self.lib, markup.as_ptr())
                .map_err(|c| self.code_error(c, "parse subdev spec"))?;
            let code = unsafe { (self.lib.set_rx_subdev_spec)(self.handle, subdev.handle, MBOARD) };
            self.check(code, "set rx subdev spec")
        }

        fn set_rx_antenna(&mut self, antenna: &str) -> SdrResult<()> {
            let cant = cstring(antenna)?;
            let code = unsafe { (self.lib.set_rx_antenna)(self.handle, cant.as_ptr(), CHAN) };
            self.check(code, "set rx antenna")
        }

        fn rx_antennas(&mut self) -> SdrResult<Vec<String>> {
            self.names(self.lib.get_rx_antennas, CHAN, "get rx antennas")
        }

        fn rx_sensor_names(&mut self, chan: usize) -> SdrResult<Vec<String>> {
            self.names(self.lib.get_rx_sensor_names, chan, "get rx sensor names")
        }

        fn rx_sensor(&mut self, name: &str, chan: usize) -> SdrResult<SensorValue> {
            self.sensor(self.lib.get_rx_sensor, name, chan)
        }

        fn mboard_sensor_names(&mut self, mboard: usize) -> SdrResult<Vec<String>> {
            self.names(self.lib.get_mboard_sensor_names, mboard, "get mboard sensor names")
        }

        fn mboard_sensor(&mut self, name: &str, mboard: usize) -> SdrResult<SensorValue> {
            self.sensor(self.lib.get_mboard_sensor, name, mboard)
        }

        fn set_gpio_attr(
            &mut self,
            bank: &str,
            attr: GpioAttr,
            value: u32,
            mask: u32,
        ) -> SdrResult<()> {
            let cbank = cstring(bank)?;
            let cattr = cstring(attr.as_str())?;
            let code = unsafe {
                (self.lib.set_gpio_attr)(
                    self.handle,
                    cbank.as_ptr(),
                    cattr.as_ptr(),
                    value,
                    mask,
                    MBOARD,
                )
            };
            self.check(code, "set gpio attr")
        }

        fn gpio_attr(&mut self, bank: &str, attr: GpioAttr) -> SdrResult<u32> {
            let cbank = cstring(bank)?;
            let cattr = cstring(attr.as_str())?;
            let mut value = 0u32;
            let code = unsafe {
                (self.lib.get_gpio_attr)(self.handle, cbank.as_ptr(), cattr.as_ptr(), MBOARD, &mut value)
            };
            self.check(code, "get gpio attr")?;
            Ok(value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_name() {
        assert_eq!(UhdDriver::new().name(), "uhd");
    }

    #[cfg(not(feature = "uhd"))]
    #[test]
    fn test_unavailable_without_feature() {
        let driver = UhdDriver::new();
        assert!(!driver.is_available());
        assert!(driver.discover().is_empty());
        match driver.create_from_string("type=b200") {
            Err(SdrError::HardwareError(msg)) => assert!(msg.contains("--features uhd")),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("UHD device created without libuhd"),
        }
    }
}
