pub mod app;
pub mod shutdown;

pub use app::Application;
pub use shutdown::ShutdownManager;
