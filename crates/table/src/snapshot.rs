//! Deep table views and the pretty printer

use std::fmt;

use serde::Serialize;

use spindle_aggregator::AggregatorSnapshot;
use spindle_matcher::Matcher;
use spindle_rewriter::Rewriter;
use spindle_route::RouteSnapshot;

/// Deep, read-only view of the whole table
///
/// Produced by [`Table::snapshot`](crate::Table::snapshot); fully
/// decoupled from the live table, so concurrent mutations never alter an
/// already-returned snapshot. `Display` renders the human-readable table
/// used by the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct TableSnapshot {
    /// Rewriters in application order
    pub rewriters: Vec<Rewriter>,
    /// Aggregators in registration order
    pub aggregators: Vec<AggregatorSnapshot>,
    /// Blacklist entries in evaluation order
    pub blacklist: Vec<Matcher>,
    /// Routes in evaluation order, each with its destinations
    pub routes: Vec<RouteSnapshot>,
    /// The relay's spool directory
    pub spool_dir: String,
}

// Minimum column widths; headers stay aligned even on an empty table.
const MIN_W_SHORT: usize = 4;
const MIN_W_MED: usize = 8;
const MIN_W_ADDR: usize = 16;

fn width<I, S>(minimum: usize, items: I) -> usize
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| s.as_ref().len())
        .fold(minimum, usize::max)
}

impl fmt::Display for TableSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_rewriters(f)?;
        self.fmt_blacklist(f)?;
        self.fmt_aggregations(f)?;
        self.fmt_routes(f)
    }
}

impl TableSnapshot {
    fn fmt_rewriters(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let w_old = width(MIN_W_SHORT, self.rewriters.iter().map(Rewriter::old));
        let w_new = width(MIN_W_SHORT, self.rewriters.iter().map(Rewriter::new_value));
        let w_max = width(
            MIN_W_SHORT,
            self.rewriters.iter().map(|rw| rw.max().to_string()),
        );

        writeln!(f, "\n## Rewriters:")?;
        let header = format!("{:>w_old$} {:>w_new$} {:>w_max$}", "old", "new", "max");
        writeln!(f, "{}", header)?;
        writeln!(f, "{}", "=".repeat(header.len()))?;
        for rw in &self.rewriters {
            writeln!(
                f,
                "{:>w_old$} {:>w_new$} {:>w_max$}",
                rw.old(),
                rw.new_value(),
                rw.max()
            )?;
        }
        Ok(())
    }

    fn fmt_blacklist(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let w_prefix = width(MIN_W_SHORT, self.blacklist.iter().map(Matcher::prefix));
        let w_sub = width(MIN_W_SHORT, self.blacklist.iter().map(Matcher::sub));
        let w_regex = width(MIN_W_SHORT, self.blacklist.iter().map(Matcher::regex));

        writeln!(f, "\n## Blacklist:")?;
        let header = format!("{:>w_prefix$} {:>w_sub$} {:>w_regex$}", "prefix", "substr", "regex");
        writeln!(f, "{}", header)?;
        writeln!(f, "{}", "=".repeat(header.len()))?;
        for entry in &self.blacklist {
            writeln!(
                f,
                "{:>w_prefix$} {:>w_sub$} {:>w_regex$}",
                entry.prefix(),
                entry.sub(),
                entry.regex()
            )?;
        }
        Ok(())
    }

    fn fmt_aggregations(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let w_fun = width(
            MIN_W_SHORT,
            self.aggregators.iter().map(|a| a.function.as_str()),
        );
        let w_regex = width(MIN_W_MED, self.aggregators.iter().map(|a| a.regex.as_str()));
        let w_fmt = width(
            MIN_W_MED,
            self.aggregators.iter().map(|a| a.out_format.as_str()),
        );
        let w_interval = width(
            MIN_W_MED,
            self.aggregators.iter().map(|a| a.interval.to_string()),
        );
        let w_wait = width(MIN_W_SHORT, self.aggregators.iter().map(|a| a.wait.to_string()));

        writeln!(f, "\n## Aggregations:")?;
        let header = format!(
            "{:>w_fun$} {:>w_regex$} {:>w_fmt$} {:>w_interval$} {:>w_wait$}",
            "func", "regex", "outFmt", "interval", "wait"
        );
        writeln!(f, "{}", header)?;
        writeln!(f, "{}", "=".repeat(header.len()))?;
        for agg in &self.aggregators {
            writeln!(
                f,
                "{:>w_fun$} {:>w_regex$} {:>w_fmt$} {:>w_interval$} {:>w_wait$}",
                agg.function.as_str(),
                agg.regex,
                agg.out_format,
                agg.interval,
                agg.wait
            )?;
        }
        Ok(())
    }

    fn fmt_routes(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let w_type = width(MIN_W_MED, self.routes.iter().map(|r| r.kind.as_str()));
        let w_key = width(MIN_W_MED, self.routes.iter().map(|r| r.key.as_str()));
        let w_prefix = width(MIN_W_SHORT, self.routes.iter().map(|r| r.matcher.prefix()));
        let w_sub = width(MIN_W_SHORT, self.routes.iter().map(|r| r.matcher.sub()));
        let w_regex = width(MIN_W_SHORT, self.routes.iter().map(|r| r.matcher.regex()));

        let dests = || self.routes.iter().flat_map(|r| r.dests.iter());
        let w_d_prefix = width(MIN_W_SHORT, dests().map(|d| d.matcher.prefix()));
        let w_d_sub = width(MIN_W_SHORT, dests().map(|d| d.matcher.sub()));
        let w_d_regex = width(MIN_W_SHORT, dests().map(|d| d.matcher.regex()));
        let w_d_addr = width(MIN_W_ADDR, dests().map(|d| d.addr.as_str()));
        let w_d_spool = width(MIN_W_ADDR, dests().map(|d| d.spool_dir.as_str()));

        writeln!(f, "\n## Routes:")?;
        let header = format!(
            "  {:>w_type$} {:>w_key$} {:>w_prefix$} {:>w_sub$} {:>w_regex$}",
            "type", "key", "prefix", "substr", "regex"
        );
        writeln!(f, "{}", header)?;
        writeln!(f, "{}", "=".repeat(header.len()))?;

        for route in &self.routes {
            writeln!(
                f,
                "> {:>w_type$} {:>w_key$} {:>w_prefix$} {:>w_sub$} {:>w_regex$}",
                route.kind.as_str(),
                route.key,
                route.matcher.prefix(),
                route.matcher.sub(),
                route.matcher.regex()
            )?;
            let dest_header = format!(
                "        {:>w_d_prefix$} {:>w_d_sub$} {:>w_d_regex$} {:>w_d_addr$} {:>w_d_spool$} {:>6} {:>6} {:>6}",
                "prefix", "substr", "regex", "addr", "spoolDir", "spool", "pickle", "online"
            );
            writeln!(f, "{}", dest_header)?;
            writeln!(f, "        {}", "-".repeat(dest_header.len().saturating_sub(8)))?;
            for dest in &route.dests {
                writeln!(
                    f,
                    "        {:>w_d_prefix$} {:>w_d_sub$} {:>w_d_regex$} {:>w_d_addr$} {:>w_d_spool$} {:>6} {:>6} {:>6}",
                    dest.matcher.prefix(),
                    dest.matcher.sub(),
                    dest.matcher.regex(),
                    dest.addr,
                    dest.spool_dir,
                    dest.spool,
                    dest.pickle,
                    dest.online
                )?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_snapshot() -> TableSnapshot {
        TableSnapshot {
            rewriters: vec![],
            aggregators: vec![],
            blacklist: vec![],
            routes: vec![],
            spool_dir: "spool".into(),
        }
    }

    #[test]
    fn test_empty_table_prints_all_sections() {
        let out = empty_snapshot().to_string();
        assert!(out.contains("## Rewriters:"));
        assert!(out.contains("## Blacklist:"));
        assert!(out.contains("## Aggregations:"));
        assert!(out.contains("## Routes:"));
    }

    #[test]
    fn test_rewriter_rows() {
        let mut snap = empty_snapshot();
        snap.rewriters
            .push(Rewriter::new("a.very.long.pattern", "short", 3).unwrap());

        let out = snap.to_string();
        assert!(out.contains("a.very.long.pattern"));
        assert!(out.contains("short"));
        // the column widens to fit the longest entry
        let header_line = out
            .lines()
            .find(|l| l.contains("old") && l.contains("new"))
            .unwrap();
        assert!(header_line.len() >= "a.very.long.pattern".len());
    }

    #[test]
    fn test_blacklist_rows() {
        let mut snap = empty_snapshot();
        snap.blacklist.push(Matcher::new("junk.", "", "").unwrap());

        let out = snap.to_string();
        assert!(out.contains("junk."));
    }

    #[test]
    fn test_printer_is_pure() {
        let snap = empty_snapshot();
        assert_eq!(snap.to_string(), snap.to_string());
    }
}
