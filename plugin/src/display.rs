/// Pad `val` with trailing spaces so its leftmost glyph lands in a fixed
/// spot in the upper-left corner of the icon. Numeral glyphs are wider than
/// the space glyph, so the pad width shrinks as the digit count grows and
/// clamps past four characters.
pub fn pad_right(val: &str) -> String {
    let width = match val.len() {
        1 => 10,
        2 | 3 => 9,
        _ => 7,
    };
    format!("{val:<width$}")
}

/// Wrap an SVG document in the data URI shape `setImage` accepts.
pub fn encode_svg(svg: &str) -> String {
    format!("data:image/svg+xml;charset=utf8,{svg}")
}
