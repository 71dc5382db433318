#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let cfg = proxyforge::config::ProxyConfig::default();
    if let Ok(analysis) = proxyforge::pipeline::analyze_bytes(data, "fuzz.dll", &cfg) {
        let _ = analysis.generate(&cfg.generator);
    }
});
