/// Pod lifecycle callbacks.
///
/// Callbacks are invoked from the coordinator's watch task, never from the
/// engine's own task, so implementations must only hand the event off.
pub trait PodListener: Send + Sync {
  /// The pod's container ID became observable. Called at most once.
  fn container(&self, id: &str);

  /// The readiness probe passed, or the pod is running and has no probe.
  fn ready(&self);

  /// The pod reached a terminal phase. Called at most once.
  fn done(&self, failed: bool, message: &str);
}

/// Receives values recognised in pod output.
pub trait OutputReceiver: Send + Sync {
  /// A `var NAME=VALUE` line.
  fn variable(&self, name: &str, value: &str);

  /// A complete `workflow { ... }` block. Later blocks replace earlier ones.
  fn workflow(&self, text: &str);
}
