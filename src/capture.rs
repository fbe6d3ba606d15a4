//! Capture-derived template construction.
//!
//! [`begin`] puts a stream into recording mode: operations enqueued on it
//! afterwards are appended to a graph under construction instead of
//! executing, with dependencies inferred from enqueue order. [`end`]
//! finalizes the recording and transfers ownership of the new template to
//! the caller.

use cudarc::driver::sys as cuda_sys;

use crate::error::{GraphError, Result};
use crate::status::{check, identify};
use crate::stream::Stream;
use crate::template::GraphTemplate;

/// How a capture interacts with work on other threads and streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CaptureMode {
    /// Potentially unsafe driver calls anywhere in the process invalidate
    /// the capture.
    #[default]
    Global,
    /// Only calls on this thread can invalidate the capture.
    ThreadLocal,
    /// No cross-thread invalidation tracking.
    Relaxed,
}

impl CaptureMode {
    fn to_sys(self) -> cuda_sys::CUstreamCaptureMode {
        match self {
            CaptureMode::Global => cuda_sys::CUstreamCaptureMode::CU_STREAM_CAPTURE_MODE_GLOBAL,
            CaptureMode::ThreadLocal => {
                cuda_sys::CUstreamCaptureMode::CU_STREAM_CAPTURE_MODE_THREAD_LOCAL
            }
            CaptureMode::Relaxed => cuda_sys::CUstreamCaptureMode::CU_STREAM_CAPTURE_MODE_RELAXED,
        }
    }
}

/// Transition `stream` into recording mode.
///
/// Fails with [`GraphError::Capture`] if the stream is already recording.
pub fn begin(stream: &Stream, mode: CaptureMode) -> Result<()> {
    if is_capturing(stream)? {
        return Err(GraphError::Capture(format!(
            "{} is already capturing",
            identify::stream(stream.raw())
        )));
    }
    check(
        unsafe { cuda_sys::cuStreamBeginCapture_v2(stream.raw(), mode.to_sys()) },
        || {
            format!(
                "beginning capture of operations on {}",
                identify::stream(stream.raw())
            )
        },
    )
}

/// Whether `stream` is currently recording.
pub fn is_capturing(stream: &Stream) -> Result<bool> {
    let mut status = cuda_sys::CUstreamCaptureStatus::CU_STREAM_CAPTURE_STATUS_NONE;
    check(
        unsafe { cuda_sys::cuStreamIsCapturing(stream.raw(), &mut status) },
        || {
            format!(
                "querying the capture status of {}",
                identify::stream(stream.raw())
            )
        },
    )?;
    Ok(status == cuda_sys::CUstreamCaptureStatus::CU_STREAM_CAPTURE_STATUS_ACTIVE)
}

/// Finalize recording on `stream` into an owned [`GraphTemplate`].
///
/// Fails with [`GraphError::Capture`] if the stream was never put into
/// recording mode, if capture already ended, or if the recording was
/// invalidated in the meantime.
pub fn end(stream: &Stream) -> Result<GraphTemplate> {
    let mut raw: cuda_sys::CUgraph = std::ptr::null_mut();
    let status = unsafe { cuda_sys::cuStreamEndCapture(stream.raw(), &mut raw) };

    match status {
        cuda_sys::CUresult::CUDA_SUCCESS if !raw.is_null() => {
            tracing::debug!(
                stream = ?stream.raw(),
                template = ?raw,
                "finalized stream capture into a graph template"
            );
            Ok(GraphTemplate::adopt(raw))
        }
        cuda_sys::CUresult::CUDA_SUCCESS => Err(GraphError::Capture(format!(
            "{} produced no template; the capture was invalidated",
            identify::stream(stream.raw())
        ))),
        cuda_sys::CUresult::CUDA_ERROR_ILLEGAL_STATE
        | cuda_sys::CUresult::CUDA_ERROR_STREAM_CAPTURE_INVALIDATED => {
            Err(GraphError::Capture(format!(
                "{} was not capturing, or its capture was invalidated ({status:?})",
                identify::stream(stream.raw())
            )))
        }
        failing => Err(GraphError::DriverCall {
            status: failing,
            context: format!(
                "completing the capture of operations into a graph on {}",
                identify::stream(stream.raw())
            ),
        }),
    }
}
