//! Per-child diagnostics kept while a child server is running.

use std::collections::VecDeque;

/// Rolling buffer for per-child stderr output.
///
/// Children report startup problems on stderr, so the tail is logged when a
/// handshake or readiness probe fails.
pub struct StderrBuffer {
    lines: VecDeque<String>,
    capacity: usize,
}

impl StderrBuffer {
    /// Create a new stderr buffer with the given line capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a new stderr line, evicting the oldest if at capacity.
    pub fn push(&mut self, line: String) {
        if self.capacity == 0 {
            return;
        }
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// The last `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stderr_buffer_capacity() {
        let mut buf = StderrBuffer::new(3);
        buf.push("line1".to_string());
        buf.push("line2".to_string());
        buf.push("line3".to_string());
        buf.push("line4".to_string()); // should evict "line1"
        assert_eq!(buf.tail(10), vec!["line2", "line3", "line4"]);
    }

    #[test]
    fn test_stderr_tail() {
        let mut buf = StderrBuffer::new(10);
        for i in 0..5 {
            buf.push(format!("line{i}"));
        }
        assert_eq!(buf.tail(2), vec!["line3".to_string(), "line4".to_string()]);
        assert_eq!(buf.tail(50).len(), 5);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut buf = StderrBuffer::new(0);
        buf.push("dropped".to_string());
        assert!(buf.tail(1).is_empty());
    }
}
