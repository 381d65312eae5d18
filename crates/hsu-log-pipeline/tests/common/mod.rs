/// Helpers for inspecting formatted log lines
pub struct LogLines {
    lines: Vec<String>,
}

impl LogLines {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    /// Check if any line contains a pattern
    #[allow(dead_code)]
    pub fn contains(&self, pattern: &str) -> bool {
        self.lines.iter().any(|line| line.contains(pattern))
    }

    /// Check if lines contain all patterns in order
    #[allow(dead_code)]
    pub fn contains_sequence(&self, patterns: &[&str]) -> bool {
        let mut pattern_idx = 0;

        for line in &self.lines {
            if pattern_idx < patterns.len() && line.contains(patterns[pattern_idx]) {
                pattern_idx += 1;
            }
        }

        pattern_idx == patterns.len()
    }

    /// Count lines containing a pattern
    pub fn count_occurrences(&self, pattern: &str) -> usize {
        self.lines.iter().filter(|line| line.contains(pattern)).count()
    }

    /// Message part of every line (after `LEVEL: `)
    pub fn messages(&self) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|line| line.split_once(": ").map(|(_, message)| message))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Print all lines, for failing assertions
    #[allow(dead_code)]
    pub fn print_all(&self) {
        println!("\n=== All Logs ===");
        for (i, line) in self.lines.iter().enumerate() {
            println!("{:4}: {}", i + 1, line);
        }
        println!("================\n");
    }
}
