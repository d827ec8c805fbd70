//! libbladeRF backend
//!
//! Thin FFI layer: every [`Driver`] call maps onto one libbladeRF call and
//! hands its status code back untouched. The receive stream runs through
//! [`stream_callback`], which forwards each filled buffer to the registered
//! [`StreamHandler`] and returns the buffer the handler picks next.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_uint, c_void};
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info};

use crate::driver::{
    Direction, Driver, DriverResult, Status, StreamGeometry, StreamHandler, SyncGeometry,
};

type BladerfDevice = c_void;
type BladerfStream = c_void;
type BladerfMetadata = c_void;

type StreamCallback = unsafe extern "C" fn(
    *mut BladerfDevice,
    *mut BladerfStream,
    *mut BladerfMetadata,
    *mut c_void,
    usize,
    *mut c_void,
) -> *mut c_void;

// bladerf_format
const BLADERF_FORMAT_SC16_Q11: c_int = 0;
// bladerf_error
const BLADERF_ERR_NODEV: c_int = -7;

extern "C" {
    fn bladerf_open(device: *mut *mut BladerfDevice, identifier: *const c_char) -> c_int;
    fn bladerf_close(device: *mut BladerfDevice);
    fn bladerf_is_fpga_configured(dev: *mut BladerfDevice) -> c_int;
    fn bladerf_set_frequency(dev: *mut BladerfDevice, ch: c_int, frequency: u64) -> c_int;
    fn bladerf_set_sample_rate(
        dev: *mut BladerfDevice,
        ch: c_int,
        rate: c_uint,
        actual: *mut c_uint,
    ) -> c_int;
    fn bladerf_set_bandwidth(
        dev: *mut BladerfDevice,
        ch: c_int,
        bandwidth: c_uint,
        actual: *mut c_uint,
    ) -> c_int;
    fn bladerf_set_gain(dev: *mut BladerfDevice, ch: c_int, gain: c_int) -> c_int;
    fn bladerf_enable_module(dev: *mut BladerfDevice, ch: c_int, enable: bool) -> c_int;
    fn bladerf_init_stream(
        stream: *mut *mut BladerfStream,
        dev: *mut BladerfDevice,
        callback: StreamCallback,
        buffers: *mut *mut *mut c_void,
        num_buffers: usize,
        format: c_int,
        samples_per_buffer: usize,
        num_transfers: usize,
        user_data: *mut c_void,
    ) -> c_int;
    fn bladerf_set_stream_timeout(dev: *mut BladerfDevice, dir: c_int, timeout: c_uint) -> c_int;
    fn bladerf_stream(stream: *mut BladerfStream, layout: c_int) -> c_int;
    fn bladerf_deinit_stream(stream: *mut BladerfStream);
    fn bladerf_sync_config(
        dev: *mut BladerfDevice,
        layout: c_int,
        format: c_int,
        num_buffers: c_uint,
        buffer_size: c_uint,
        num_transfers: c_uint,
        stream_timeout: c_uint,
    ) -> c_int;
    fn bladerf_sync_tx(
        dev: *mut BladerfDevice,
        samples: *const c_void,
        num_samples: c_uint,
        metadata: *mut BladerfMetadata,
        timeout_ms: c_uint,
    ) -> c_int;
    fn bladerf_strerror(error: c_int) -> *const c_char;
}

// Channel 0, module, layout and stream direction all share the numbering
fn channel(dir: Direction) -> c_int {
    match dir {
        Direction::Rx => 0,
        Direction::Tx => 1,
    }
}

fn status(r: c_int) -> DriverResult<()> {
    if r == 0 {
        Ok(())
    } else {
        Err(Status(r))
    }
}

/// Handed to libbladeRF as the stream's user data
struct StreamContext {
    handler: Box<dyn StreamHandler>,
    buffers: *mut *mut c_void,
    num_buffers: usize,
}

struct StreamSession {
    stream: *mut BladerfStream,
    ctx: *mut StreamContext,
}

// The session pointers are only dereferenced by libbladeRF's stream thread
// while `bladerf_stream` runs, and freed once it has returned
unsafe impl Send for StreamSession {}

unsafe extern "C" fn stream_callback(
    _dev: *mut BladerfDevice,
    _stream: *mut BladerfStream,
    _meta: *mut BladerfMetadata,
    samples: *mut c_void,
    num_samples: usize,
    user_data: *mut c_void,
) -> *mut c_void {
    let ctx = &mut *(user_data as *mut StreamContext);
    // SC16 Q11: two components per sample
    let block = if samples.is_null() || num_samples == 0 {
        &[][..]
    } else {
        slice::from_raw_parts(samples as *const i16, num_samples * 2)
    };
    match ctx.handler.on_block(block) {
        Some(idx) if idx < ctx.num_buffers => *ctx.buffers.add(idx),
        // Null ends the stream
        _ => ptr::null_mut(),
    }
}

pub struct BladerfDriver {
    identifier: Option<CString>,
    dev: AtomicPtr<BladerfDevice>,
    session: Mutex<Option<StreamSession>>,
}

impl BladerfDriver {
    /// `identifier` is a libbladeRF device string such as `*:instance=0`;
    /// `None` opens the first device found
    pub fn new(identifier: Option<CString>) -> Self {
        Self {
            identifier,
            dev: AtomicPtr::new(ptr::null_mut()),
            session: Mutex::new(None),
        }
    }

    fn dev(&self) -> DriverResult<*mut BladerfDevice> {
        let dev = self.dev.load(Ordering::Acquire);
        if dev.is_null() {
            Err(Status(BLADERF_ERR_NODEV))
        } else {
            Ok(dev)
        }
    }
}

impl Driver for BladerfDriver {
    fn open(&self) -> DriverResult<()> {
        let id = self.identifier.as_ref().map_or(ptr::null(), |s| s.as_ptr());
        let mut dev: *mut BladerfDevice = ptr::null_mut();
        status(unsafe { bladerf_open(&mut dev, id) })?;
        self.dev.store(dev, Ordering::Release);
        Ok(())
    }

    fn close(&self) {
        let dev = self.dev.swap(ptr::null_mut(), Ordering::AcqRel);
        if !dev.is_null() {
            unsafe { bladerf_close(dev) };
        }
    }

    fn is_fpga_configured(&self) -> DriverResult<bool> {
        let r = unsafe { bladerf_is_fpga_configured(self.dev()?) };
        if r < 0 {
            Err(Status(r))
        } else {
            Ok(r > 0)
        }
    }

    fn set_frequency(&self, dir: Direction, hz: u64) -> DriverResult<()> {
        status(unsafe { bladerf_set_frequency(self.dev()?, channel(dir), hz) })
    }

    fn set_sample_rate(&self, dir: Direction, rate: u32) -> DriverResult<u32> {
        let mut actual: c_uint = 0;
        status(unsafe { bladerf_set_sample_rate(self.dev()?, channel(dir), rate, &mut actual) })?;
        Ok(actual)
    }

    fn set_bandwidth(&self, dir: Direction, bandwidth: u32) -> DriverResult<u32> {
        let mut actual: c_uint = 0;
        status(unsafe {
            bladerf_set_bandwidth(self.dev()?, channel(dir), bandwidth, &mut actual)
        })?;
        Ok(actual)
    }

    fn set_gain(&self, dir: Direction, gain: i32) -> DriverResult<()> {
        status(unsafe { bladerf_set_gain(self.dev()?, channel(dir), gain) })
    }

    fn enable_module(&self, dir: Direction, enable: bool) -> DriverResult<()> {
        status(unsafe { bladerf_enable_module(self.dev()?, channel(dir), enable) })
    }

    fn init_stream(
        &self,
        geometry: StreamGeometry,
        handler: Box<dyn StreamHandler>,
    ) -> DriverResult<()> {
        let dev = self.dev()?;
        let ctx = Box::into_raw(Box::new(StreamContext {
            handler,
            buffers: ptr::null_mut(),
            num_buffers: geometry.num_buffers,
        }));
        let mut stream: *mut BladerfStream = ptr::null_mut();
        let mut buffers: *mut *mut c_void = ptr::null_mut();
        let r = unsafe {
            bladerf_init_stream(
                &mut stream,
                dev,
                stream_callback,
                &mut buffers,
                geometry.num_buffers,
                BLADERF_FORMAT_SC16_Q11,
                geometry.samples_per_buffer,
                geometry.num_transfers,
                ctx as *mut c_void,
            )
        };
        if let Err(e) = status(r) {
            // Never registered, ours to free
            drop(unsafe { Box::from_raw(ctx) });
            return Err(e);
        }
        // The callback only runs once `bladerf_stream` is entered
        unsafe { (*ctx).buffers = buffers };
        *self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(StreamSession { stream, ctx });
        debug!(?geometry, "bladeRF stream initialized");
        Ok(())
    }

    fn set_stream_timeout(&self, dir: Direction, timeout_ms: u32) -> DriverResult<()> {
        status(unsafe { bladerf_set_stream_timeout(self.dev()?, channel(dir), timeout_ms) })
    }

    fn run_stream(&self) -> DriverResult<()> {
        let stream = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|s| s.stream)
            .ok_or(Status(BLADERF_ERR_NODEV))?;
        info!("bladeRF stream running");
        status(unsafe { bladerf_stream(stream, channel(Direction::Rx)) })
    }

    fn deinit_stream(&self) {
        let session = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(StreamSession { stream, ctx }) = session {
            unsafe {
                bladerf_deinit_stream(stream);
                drop(Box::from_raw(ctx));
            }
        }
    }

    fn sync_config(&self, dir: Direction, geometry: SyncGeometry) -> DriverResult<()> {
        status(unsafe {
            bladerf_sync_config(
                self.dev()?,
                channel(dir),
                BLADERF_FORMAT_SC16_Q11,
                geometry.num_buffers as c_uint,
                geometry.buffer_size as c_uint,
                geometry.num_transfers as c_uint,
                geometry.timeout_ms,
            )
        })
    }

    fn sync_tx(&self, samples: &[i16], timeout_ms: u32) -> DriverResult<()> {
        status(unsafe {
            bladerf_sync_tx(
                self.dev()?,
                samples.as_ptr() as *const c_void,
                (samples.len() / 2) as c_uint,
                ptr::null_mut(),
                timeout_ms,
            )
        })
    }

    fn strerror(&self, status: Status) -> String {
        let msg = unsafe { bladerf_strerror(status.0) };
        if msg.is_null() {
            return format!("bladeRF error {}", status.0);
        }
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}

impl Drop for BladerfDriver {
    fn drop(&mut self) {
        self.deinit_stream();
        self.close();
    }
}
