use std::fmt::Write as _;

use web_time::Instant;

use vigil_core::{DigestError, DigestStats, Scope};

/// Times digests and keeps a smoothed running average.
pub struct Hud {
    pub enabled: bool,
    digest_count: u64,
    last_ms: f32,
    ms_smooth: f32,
    pub stats: Option<DigestStats>,
}

impl Default for Hud {
    fn default() -> Self {
        Self::new()
    }
}

impl Hud {
    pub fn new() -> Self {
        Self {
            enabled: true,
            digest_count: 0,
            last_ms: 0.0,
            ms_smooth: 0.0,
            stats: None,
        }
    }

    pub fn toggle(&mut self) {
        self.enabled = !self.enabled;
    }

    pub fn digest_count(&self) -> u64 {
        self.digest_count
    }

    pub fn last_ms(&self) -> f32 {
        self.last_ms
    }

    pub fn smoothed_ms(&self) -> f32 {
        self.ms_smooth
    }

    /// Runs `scope.digest()` and records how long it took.
    pub fn measure(&mut self, scope: &Scope) -> Result<(), DigestError> {
        if !self.enabled {
            return scope.digest();
        }
        let start = Instant::now();
        let result = scope.digest();
        self.record(start.elapsed().as_secs_f32() * 1000.0, scope.stats());
        if let Err(err) = &result {
            log::warn!("measured digest failed: {err}");
        }
        result
    }

    pub fn record(&mut self, ms: f32, stats: DigestStats) {
        self.digest_count += 1;
        self.last_ms = ms;
        // simple EMA
        let a = 0.2;
        self.ms_smooth = if self.digest_count == 1 {
            ms
        } else {
            (1.0 - a) * self.ms_smooth + a * ms
        };
        self.stats = Some(stats);
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![
            format!("digests: {}", self.digest_count),
            format!("digest: {:.2} ms (avg {:.2} ms)", self.last_ms, self.ms_smooth),
        ];
        if let Some(s) = &self.stats {
            lines.push(format!("passes: {}", s.passes));
            lines.push(format!("evaluations: {}", s.evaluations));
            lines.push(format!("faults: {}", s.faults));
        }
        lines.join("  |  ")
    }
}

/// Renders a scope tree as indented text, one scope per line.
pub struct Inspector {
    pub hud: Hud,
    pub show_state: bool,
}

impl Default for Inspector {
    fn default() -> Self {
        Self::new()
    }
}

impl Inspector {
    pub fn new() -> Self {
        Self {
            hud: Hud::new(),
            show_state: true,
        }
    }

    pub fn dump(&self, scope: &Scope) -> String {
        let mut out = String::new();
        self.dump_into(scope, 0, &mut out);
        out
    }

    fn dump_into(&self, scope: &Scope, depth: usize, out: &mut String) {
        let _ = write!(
            out,
            "{:indent$}scope#{}{} watchers={}",
            "",
            scope.id(),
            if scope.is_isolated() { " (isolated)" } else { "" },
            scope.watcher_count(),
            indent = depth * 2
        );
        if self.show_state {
            let state = serde_json::to_string(&scope.own_state())
                .unwrap_or_else(|err| format!("<unserializable: {err}>"));
            let _ = write!(out, " state={state}");
        }
        out.push('\n');
        for child in scope.children() {
            self.dump_into(&child, depth + 1, out);
        }
    }

    /// Digests through the HUD and returns the tree dump afterwards.
    pub fn frame(&mut self, scope: &Scope) -> Result<String, DigestError> {
        self.hud.measure(scope)?;
        Ok(self.dump(scope))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::Value;

    #[test]
    fn test_dump_tree() {
        let root = Scope::new();
        root.set("a", 1);
        let child = root.new_child();
        child.watch(|s| s.get("a"), |_, _, _| {});
        let iso = child.new_isolated();
        iso.set("list", Value::array(["x"]));

        let dump = Inspector::new().dump(&root);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], "scope#0 watchers=0 state={\"a\":1.0}");
        assert_eq!(lines[1], "  scope#1 watchers=1 state={}");
        assert_eq!(lines[2], "    scope#2 (isolated) watchers=0 state={\"list\":[\"x\"]}");
    }

    #[test]
    fn test_hud_records_stats() {
        let root = Scope::new();
        root.watch(|s| s.get("a"), |_, _, _| {});
        let mut hud = Hud::new();
        hud.measure(&root).unwrap();
        hud.measure(&root).unwrap();

        assert_eq!(hud.digest_count(), 2);
        let stats = hud.stats.unwrap();
        assert_eq!(stats.digests, 2);
        assert_eq!(stats.passes, 1);
        assert!(hud.summary().contains("passes: 1"));
    }

    #[test]
    fn test_hud_smoothing() {
        let mut hud = Hud::new();
        hud.record(10.0, DigestStats::default());
        assert_eq!(hud.smoothed_ms(), 10.0);
        hud.record(20.0, DigestStats::default());
        assert!((hud.smoothed_ms() - 12.0).abs() < 1e-4);
    }

    #[test]
    fn test_frame_reports_divergence() {
        let root = Scope::new();
        root.watch(|s| s.get("a"), |_, _, s| {
            let n = s.get("a").as_f64().unwrap_or(0.0);
            s.set("a", n + 1.0);
        });
        let mut inspector = Inspector::new();
        assert!(matches!(
            inspector.frame(&root),
            Err(DigestError::Diverged { .. })
        ));
        assert_eq!(inspector.hud.digest_count(), 1);
    }
}
