use std::path::PathBuf;

/// Where the encoded trace goes.
#[derive(Debug, Clone)]
pub enum Transport {
  /// Comma-separated text written to a file, for debugging by eye.
  Ascii(PathBuf),
  /// Binary records written to a file.
  File(PathBuf),
  /// Binary records streamed to a collector at `host:port`.
  Socket(String),
}

/// Controls how the tracer records memory behavior.
#[derive(Debug, Clone)]
pub struct TracerConfig {
  /// Log every put-field, including primitive-to-primitive overwrites.
  pub all_putfields: bool,
  /// Log each object use immediately instead of coalescing per flush.
  pub all_uses: bool,
  /// Override the sink buffer capacity, in bytes (tests mostly).
  pub buffer_capacity: Option<usize>,
  /// Name of a function whose arguments get `Debug` records.
  pub debug_fun: Option<String>,
  pub transport: Transport,
  /// Keep the metadata word on the object itself instead of a weak
  /// side-table.
  pub use_hidden_slot: bool,
}

impl Default for TracerConfig {
  fn default() -> Self {
    Self {
      all_putfields: false,
      all_uses: false,
      buffer_capacity: None,
      debug_fun: None,
      transport: Transport::File(PathBuf::from("mem-trace")),
      use_hidden_slot: false,
    }
  }
}

impl TracerConfig {
  /// Builder-style helper to record every put-field.
  #[must_use]
  pub fn with_all_putfields(mut self) -> Self {
    self.all_putfields = true;
    self
  }

  /// Builder-style helper to log uses eagerly.
  #[must_use]
  pub fn with_all_uses(mut self) -> Self {
    self.all_uses = true;
    self
  }

  /// Builder-style helper to name the debug function.
  #[must_use]
  pub fn with_debug_fun(mut self, name: impl Into<String>) -> Self {
    self.debug_fun = Some(name.into());
    self
  }

  /// Builder-style helper to pick the transport.
  #[must_use]
  pub fn with_transport(mut self, transport: Transport) -> Self {
    self.transport = transport;
    self
  }
}
