// Domain layer: build models and the ports the provisioner talks through.

pub mod model;
pub mod ports;
