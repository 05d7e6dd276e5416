pub mod auth;
pub mod config;
pub mod context;
pub mod index;
pub mod platform;
pub mod proxy;
pub mod requeue;
pub mod resource;
pub mod spec;
pub mod status;

pub use auth::{AuthReconcileItem, GrantOpts, UserOpts};
pub use config::{Config, ImagesConfig, LoggingConfig, RetryConfig};
pub use context::ReconcileContext;
pub use index::{diff, DiffResult, Index};
pub use platform::{
    ConnectionOpts, DesiredObject, ObjectKind, PasswordRequest, PdbOpts, SecretRequest,
    ServiceOpts, ServicePort, StatefulSetOpts, WorkloadStatus,
};
pub use proxy::{
    ActivationState, ConfigSyncSettings, ListenerAttributes, MonitorAttributes, ObservedObject,
    ProxyUser, Relationships, ServerAttributes, ServiceAttributes,
};
pub use requeue::RequeueDirective;
pub use resource::{ObjectMeta, ProxyResource, ResourceKey, FINALIZER_NAME};
pub use spec::{
    AdminSpec, AuthSpec, ConfigSyncSpec, ConnectionTemplate, CooperativeMonitoring, DatabaseInfo,
    DatabaseRef, GeneratedSecretKeyRef, IntOrString, ListenerSpec, MetricsSpec, MonitorModule,
    MonitorSpec, PodDisruptionBudgetSpec, ProxyConfigSpec, ProxySpec, SecretKeySelector,
    ServerSpec, ServiceRouter, ServiceSpec, TlsSpec,
};
pub use status::{Condition, ConditionStatus, ProxyStatus, ServerStatus};
