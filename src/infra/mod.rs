pub mod docker;
pub mod helm;
pub mod kind;
pub mod kubectl;
#[cfg(feature = "kube")]
pub mod kubernetes;
pub mod process;
