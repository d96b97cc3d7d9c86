//! Incremental decoder for the line-oriented event protocol: blocks of `field:value`
//! lines separated by a blank line.

/// One complete block as read off the wire, before JSON decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Buffers bytes until a blank line closes a block. Partial UTF-8 sequences and
/// partial lines carry over to the next `push`.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buf: Vec<u8>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every actionable block completed by it, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<RawEvent> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some((end, delim)) = find_block_end(&self.buf) {
            let block: Vec<u8> = self.buf.drain(..end + delim).take(end).collect();
            if let Some(ev) = parse_block(&String::from_utf8_lossy(&block)) {
                out.push(ev);
            }
        }
        out
    }

    /// Best-effort parse of whatever is left once the remote closed the stream.
    pub fn finish(&mut self) -> Option<RawEvent> {
        let rest = std::mem::take(&mut self.buf);
        if rest.iter().all(|b| b.is_ascii_whitespace()) {
            return None;
        }
        parse_block(&String::from_utf8_lossy(&rest))
    }

    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

// Position of the first blank line and the length of the delimiter itself.
fn find_block_end(buf: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == b'\n' {
            match buf.get(i + 1) {
                Some(b'\n') => return Some((i, 2)),
                Some(b'\r') if buf.get(i + 2) == Some(&b'\n') => return Some((i, 3)),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// Parse one block. Only blocks carrying both `event` and `data` are actionable.
pub fn parse_block(block: &str) -> Option<RawEvent> {
    let mut event: Option<String> = None;
    let mut data: Option<String> = None;
    let mut id: Option<String> = None;

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = match line.split_once(':') {
            Some((f, v)) => (f, v.trim()),
            None => (line, ""),
        };
        match field {
            "event" => event = Some(value.to_string()),
            "data" => match data.as_mut() {
                Some(d) => {
                    d.push('\n');
                    d.push_str(value);
                }
                None => data = Some(value.to_string()),
            },
            "id" => id = Some(value.to_string()),
            _ => {}
        }
    }

    match (event, data) {
        (Some(event), Some(data)) if !event.is_empty() => Some(RawEvent { event, data, id }),
        _ => None,
    }
}
