//! # nwbsync — clock alignment and session conversion for lab recordings
//!
//! `nwbsync` puts the independently clocked streams of one recording session
//! (a behavioral state machine, a fiber-photometry or electrophysiology
//! console, a behavior camera and its pose estimates) onto a single
//! non-negative timeline, then writes one container per session.
//!
//! ## Pipeline overview
//!
//! ```text
//! J069_RWTautowait2_20230809_131216.json      fp.csv / ephys.safetensors
//!   │                                            │
//!   ├─ behavior::BehaviorLog                     ├─ sources::open_secondary
//!   │    trial starts (reference landmarks)      │    digital channels
//!   ├─ sources::load_processed_behavior          │
//!   │    processed trials, matched to the log    │
//!   │                                            ├─ edges::rising_edges
//!   │                                            │    landmark / camera trigger times
//!   └──────────────┬─────────────────────────────┘
//!                  ▼
//!          offset::resolve_offset         reference[0] − secondary[0]
//!                  ▼
//!          align::SessionAligner          AlignmentPlan → shift one side,
//!                  │                      re-anchor video / pose at the camera trigger
//!                  ▼
//!          metadata::merge_layers         defaults ⊕ lab template ⊕ session fields
//!                  ▼
//!          container::SafetensorsContainer → sub-J069_ses-….nwb
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use nwbsync::{convert, AlignConfig, ConversionRequest};
//! use std::path::Path;
//!
//! let request = ConversionRequest::new(
//!     "raw/J069_RWTautowait2_20230809_131216.json",
//!     "raw/J069_2023-08-09.csv",
//! )
//! .with_video("raw/J069_2023-08-09_cam01.mp4");
//!
//! let (report, diagnostics) = convert(&request, Path::new("nwbfiles"), &AlignConfig::default()).unwrap();
//! println!("{} ({} diagnostics)", report.output_path.display(), diagnostics.len());
//! ```
//!
//! ## Running individual steps
//!
//! ```
//! use nwbsync::{rising_edges, resolve_offset, rewrite, AlignmentPlan, Threshold};
//! use ndarray::array;
//!
//! let ttl = array![0.0, 0.0, 1.0, 1.0, 0.0, 1.0];
//! assert_eq!(rising_edges(ttl.view(), Threshold::Midpoint).unwrap(), vec![2, 5]);
//!
//! let offset = resolve_offset(&[100.0, 105.0], &[3.0, 8.0]).unwrap();
//! assert_eq!(offset.seconds(), 97.0);
//! assert!(matches!(AlignmentPlan::choose(0.0, offset), AlignmentPlan::AnchorSecondary(_)));
//!
//! let ts = rewrite(array![0.0, 1.0, 2.0].view(), offset.seconds());
//! assert_eq!(ts[0], 97.0);
//! ```

pub mod align;
pub mod batch;
pub mod behavior;
pub mod config;
pub mod container;
pub mod convert;
pub mod diagnostics;
pub mod edges;
pub mod error;
pub mod io;
pub mod metadata;
pub mod offset;
pub mod session;
pub mod sources;
pub mod stream;
pub mod table;
pub mod timeline;

use std::path::Path;

use anyhow::Result;

// ── Crate-root re-exports ─────────────────────────────────────────────────
//
// Everything a downstream user is likely to need is available directly as
// `nwbsync::Foo` without having to know the internal module layout.

// align — orchestrator, plan and strategy traits
pub use align::{
    align_session, session_start,
    AlignmentPlan, AlignmentStage, Finalized, Lock, LockedStream,
    OffsetResolved, Rewritten, SessionAligner,
    DependentStream, ReferenceProvider, TriggerProvider,
};

// batch
pub use batch::{dataset_to_nwb, error_file_path, BatchReport, SessionResult, SessionStatus};

// behavior
pub use behavior::{BehaviorLog, Device, EventRecord, StateInterval};

// config
pub use config::{AlignConfig, BatchConfig};

// container
pub use container::{ContainerWriter, SafetensorsContainer, SessionContainer};

// convert
pub use convert::{convert_session, ConversionReport, ConversionRequest, Outcome, Templates};

// diagnostics / errors
pub use diagnostics::{Diagnostic, Diagnostics};
pub use error::{AlignError, ConfigError};

// edges / offset / timeline — the alignment primitives
pub use edges::{edge_times, first_edge_time, rising_edges, Threshold};
pub use offset::{resolve_offset, resolve_with_report, ClockOffset, OffsetReport};
pub use timeline::{rewrite, rewrite_inplace, rewrite_slice};

// io — safetensors layout
pub use io::{StFile, StWriter};

// metadata
pub use metadata::{deep_merge, fiber_photometry_metadata, merge_layers, table_regions};

// session / table
pub use session::{parse_session_date, Session};
pub use table::{FiberRow, SessionEntry, SessionTable};

// sources / stream
pub use sources::{
    load_processed_behavior, open_secondary, EventLandmarks, ProcessedBehavior, ProcessedTrials, TriggeredRecording,
    VideoSource,
};
pub use stream::{DigitalChannel, Stream};

/// Convert **one session** with no metadata templates, writing the
/// safetensors-layout container into `output_dir`.
///
/// An existing output is replaced.  Returns the report together with the
/// diagnostics collected along the way.
///
/// For template layers, a custom [`ContainerWriter`] or skip-if-exists
/// behavior, call [`convert_session`] directly.
///
/// # Errors
///
/// * [`ConfigError`] — a file, column or trigger channel is missing, or the
///   behavior-log name does not encode a session.
/// * [`AlignError`] — no trigger edges, a stream left before the session
///   start, or a camera-locked stream without a camera trigger.
pub fn convert(request: &ConversionRequest, output_dir: &Path, cfg: &AlignConfig) -> Result<(ConversionReport, Diagnostics)> {
    let mut diagnostics = Diagnostics::new();
    let report = convert_session(
        request,
        output_dir,
        true,
        cfg,
        &Templates::default(),
        &SafetensorsContainer,
        &mut diagnostics,
    )?;
    Ok((report, diagnostics))
}
