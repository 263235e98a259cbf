/// Initialize the console logger.
///
/// Defaults to level info. `RUST_LOG` overrides the filter as usual.
pub fn init() {
    use env_logger::fmt::Color;
    use std::io::Write;

    // Stable color per module path. Some colors are hard to read on (at
    // least) dark terminals and some others are just ugly.
    fn color(target: &str) -> Color {
        let hash = target.bytes().fold(42u8, |c, x| c ^ x);
        Color::Ansi256(match hash {
            c @ 0..=1 => c + 2,
            c @ 16..=21 => c + 6,
            c @ 52..=55 | c @ 126..=129 => c + 4,
            c @ 163..=165 | c @ 200..=201 => c + 3,
            c @ 207 => c + 1,
            c @ 232..=240 => c + 9,
            c => c,
        })
    }

    let mut builder = env_logger::Builder::new();
    let filters = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    builder.parse_filters(&filters);

    builder.format(|buf, record| {
        let timestamp = buf.timestamp_millis();

        let mut level = buf.default_level_style(record.metadata().level());
        level.set_bold(true);
        let level = level.value(record.metadata().level().as_str());

        // Strip the crate name from the module path
        let target = record
            .module_path()
            .map(|path| path.find("::").map(|n| &path[n + 2..]).unwrap_or(path))
            .unwrap_or_default();
        let mut tag = buf.style();
        tag.set_color(color(target));

        writeln!(
            buf,
            "{} {:>20} {:<5}: {}",
            timestamp,
            tag.value(target),
            level,
            record.args()
        )
    });

    builder.init()
}
