pub mod app;
pub mod k8s;
pub mod os;
