//! Publisher integration tests.

mod support;
mod lifecycle;
mod routing;
mod middleware;
