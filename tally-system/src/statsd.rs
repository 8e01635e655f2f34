use tally_statsd::CounterMetric;

/// Counter metrics for Tally system components.
pub enum SystemCounters {
    /// Number of tasks created through [`spawn`](crate::spawn()).
    ///
    /// This metric is tagged with:
    ///  - `id`: The task id, the service name or the location of the spawn call.
    RuntimeTaskCreated,
    /// Number of tasks spawned through [`spawn`](crate::spawn()) that have terminated.
    ///
    /// This metric is tagged with:
    ///  - `id`: The task id, the service name or the location of the spawn call.
    RuntimeTaskTerminated,
}

impl CounterMetric for SystemCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::RuntimeTaskCreated => "runtime.task.spawn.created",
            Self::RuntimeTaskTerminated => "runtime.task.spawn.terminated",
        }
    }
}
