pub mod multiplexer;
pub mod output_route;
pub mod recorder;
