/// Literal that opens a dependency directive, e.g. `#pragma REQUIRE(common_view_lib.glsl)`.
pub const REQUIRE_PRAGMA: &str = "REQUIRE(";

/// Yields the fragment names referenced by `REQUIRE(<name>)` directives in
/// source order.
///
/// A directive missing its closing parenthesis ends at the line break. The
/// directive text itself is left untouched in the source.
pub fn required_names(source: &str) -> impl Iterator<Item = &str> + '_ {
    let mut haystack = source;
    std::iter::from_fn(move || loop {
        let start = haystack.find(REQUIRE_PRAGMA)? + REQUIRE_PRAGMA.len();
        let rest = &haystack[start..];
        let end = rest.find([')', '\n']).unwrap_or(rest.len());
        haystack = &rest[end..];
        let name = rest[..end].trim();
        if !name.is_empty() {
            return Some(name);
        }
    })
}
