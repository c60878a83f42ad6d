use quick_xml::events::Event;
use quick_xml::Reader;

use crate::error::{FilterError, Result};

/// Re-reads serialized output with an independent XML reader: every end tag
/// must match its start tag, nothing may stay open and there is exactly one
/// root element.
pub fn ensure_well_formed(text: &str) -> Result<()> {
    let mut reader = Reader::from_str(text);
    reader.config_mut().check_end_names = true;

    let mut depth = 0usize;
    let mut roots = 0usize;
    loop {
        let event = reader.read_event().map_err(|e| {
            FilterError::MalformedOutput(format!(
                "at byte {}: {}",
                reader.error_position(),
                e
            ))
        })?;
        match event {
            Event::Start(_) => {
                if depth == 0 {
                    roots += 1;
                }
                depth += 1;
            }
            Event::Empty(_) => {
                if depth == 0 {
                    roots += 1;
                }
            }
            Event::End(_) => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    FilterError::MalformedOutput("closing tag without opening tag".to_string())
                })?;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(FilterError::MalformedOutput(format!(
            "{} element(s) left open at end of document",
            depth
        )));
    }
    if roots != 1 {
        return Err(FilterError::MalformedOutput(format!(
            "expected one root element, found {}",
            roots
        )));
    }
    Ok(())
}
