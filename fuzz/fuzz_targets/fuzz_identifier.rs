#![no_main]

use libfuzzer_sys::fuzz_target;
use seqalloc::format::IdentifierFormatter;

fuzz_target!(|data: &[u8]| {
    let formatter = IdentifierFormatter::with_defaults();
    let identifier = String::from_utf8_lossy(data);

    // Anything parse accepts must format back to the same string
    if let Ok(value) = formatter.parse("employee", &identifier) {
        assert_eq!(formatter.format("employee", value).unwrap(), identifier);
    }
});
