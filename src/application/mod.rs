// Application layer - The trend engine and its collaborator seams
pub mod admission;
pub mod animator;
pub mod autoscale;
pub mod chart;
pub mod clock;
pub mod controller;
pub mod error_reporter;
pub mod events;
pub mod history;
pub mod reconcile;
pub mod render_surface;
pub mod sample_source;
pub mod search;
pub mod source_transport;
pub mod subscription;
pub mod throttle;
