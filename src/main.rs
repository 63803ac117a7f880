use memtrace::{
  decode_trace, trace_to_json, LoggingAnalysis, ObjRef, TracerConfig, Transport, Value,
};

fn main() {
  tracing_subscriber::fmt::init();

  let trace_path = std::env::temp_dir().join("memtrace-demo");
  let config =
    TracerConfig::default().with_transport(Transport::File(trace_path.clone()));
  let mut analysis =
    LoggingAnalysis::new(&config, ObjRef::plain()).expect("open trace file");

  // A small synthetic program: build an object, hand it to a function,
  // link it into another object, then let it go.
  analysis.script_enter(1, "demo.js");
  let cache = ObjRef::plain();
  analysis.literal(2, &Value::Obj(cache.clone()));
  analysis.write(3, "cache", &Value::Obj(cache.clone()), &Value::Undefined);

  let store = ObjRef::function(10, "store");
  analysis.literal(4, &Value::Obj(store.clone()));
  let entry = ObjRef::plain();
  analysis.literal(5, &Value::Obj(entry.clone()));
  analysis
    .invoke_fun_pre(6, &store, None, &[Value::Obj(entry.clone())]);
  analysis.function_enter(10, &store, None);
  analysis.put_field_pre(11, &cache, "latest", &Value::Obj(entry.clone()));
  cache.set_prop("latest", Value::Obj(entry.clone()));
  analysis.put_field(11, &cache, "latest", &Value::Obj(entry.clone()));
  analysis.function_exit(12, &Value::Undefined);
  analysis.invoke_fun(
    6,
    &store,
    None,
    &[Value::Obj(entry)],
    &Value::Undefined,
    false,
  );
  analysis.script_exit(13);
  analysis.end_execution().expect("finish trace");

  let bytes = std::fs::read(&trace_path).expect("read trace");
  let records = decode_trace(&bytes).expect("decode trace");
  println!("=== demo trace ({} records) ===", records.len());
  print!("{}", trace_to_json(&records));
}
