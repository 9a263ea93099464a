// Presentation layer - Concrete render surface and notification sink
pub mod log_surface;
pub mod notifier;
