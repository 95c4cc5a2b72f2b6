#![allow(async_fn_in_trait)]

pub mod audit;
pub mod clock;
pub mod config;
pub mod error;
pub mod gate;
pub mod generation;
pub mod geo;
pub mod lifecycle;
pub mod mode;
pub mod model;
pub mod notice;
pub mod pricing;
pub mod render;
pub mod session;
pub mod sim;
pub mod sync;

pub use audit::{AuditChannel, AuditEvent, AuditKind, AuditLog, AuditSink, ChainBreak};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, CounterScope, EngineConfig, SearchAreaLimits, SyncConfig};
pub use error::{RemoteError, SyncError, ValidationError};
pub use gate::{
    DenialReason, EntitlementProvider, EntitlementStatus, GateDecision, GateError, GrantReason,
    PaymentGate, PaymentOutcome, PaymentProcessor, PaymentRequest,
};
pub use generation::{
    AreaGenerationOrchestrator, GenerationContext, GenerationEndpoint, GenerationError,
    GenerationRequest, GenerationResponse, GenerationSuccess,
};
pub use geo::{CoordinateError, GeoBounds, LatLng};
pub use lifecycle::Liveness;
pub use mode::{ClickAction, InteractionMode, ModeController};
pub use model::{
    Cents, GeneratedArea, MapPoint, Notification, OwnerId, PendingPoint, PeriodTag, RecordId,
    SearchArea, PENDING_POINT_ID,
};
pub use notice::{NoticeLevel, NoticeQueue, UserNotice};
pub use pricing::{
    compute_progression, preview, GenerationState, PricingConfig, PricingSurface, Progression,
    ProgressionPreview, RadiusProgression, StepPricing,
};
pub use render::{DeleteState, ItemKind, ItemRef, RenderError, RenderFrame, RenderSurface};
pub use session::{ClickOutcome, HuntSession, SessionError, SessionParts};
pub use sync::{
    CacheError, FetchSource, LocalCache, ReconcileReport, RemoteStore, SearchAreaUpdate,
    StorageBackend, SyncedLists, Synchronizer,
};
