mod pipeline_test;
mod shutdown_test;
