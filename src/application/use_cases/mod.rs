pub mod match_decision;
pub mod parameter_extractor;
pub mod query_service;
pub mod result_streamer;
pub mod template_binder;
pub mod vector_index;
