pub trait TraceableError: std::error::Error {
    fn metric_label(&self) -> String;

    /// Transient errors are retried by their owner and only logged at warn level.
    fn is_transient(&self) -> bool {
        false
    }
}
