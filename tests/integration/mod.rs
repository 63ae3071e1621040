/****************** Route discovery ***********/
mod discovery;
mod duplicate_suppression;
mod unsupported_option;
mod unreachable_destination;

/****************** Route maintenance *********/
mod link_failure;
mod route_shortening;
mod sustained_flow;

/****************** Cache strategies **********/
mod link_cache;

/****************** Platform ******************/
mod dsr_cli;
