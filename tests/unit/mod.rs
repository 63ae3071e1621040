/****************** Scenarios ******************/
mod scenario;
