pub(crate) mod flow_controller;
pub(crate) mod health_check_controller;
