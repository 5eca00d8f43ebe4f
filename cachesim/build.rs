fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    // Generated here rather than in a const fn: the table is 64KiB and blows
    // through the const-eval step limit, and build script output is cached
    // across compilations anyway.
    let out_dir = std::env::var_os("OUT_DIR").unwrap();
    let path = std::path::Path::new(&out_dir).join("hex.rs");
    let mut src = String::with_capacity(1 << 19);
    src.push_str("pub const HEX_LOOKUP: [u8; 1 << 16] = [");
    for pair in 0..=u16::MAX {
        let hi = (pair >> 8) as u8;
        let lo = (pair & 0xFF) as u8;
        src.push_str(&format!("{},", hex_digit(hi) << 4 | hex_digit(lo)));
    }
    src.push_str("];");
    std::fs::write(&path, src).unwrap();
}

/// Maps an ASCII hex character to its value; anything else maps to 0, which
/// matches how the trace parser treats malformed input (garbage in, garbage
/// out, but never a panic).
const fn hex_digit(input: u8) -> u8 {
    match input {
        b'0'..=b'9' => input - b'0',
        b'A'..=b'F' => input - b'A' + 10,
        b'a'..=b'f' => input - b'a' + 10,
        _ => 0,
    }
}
