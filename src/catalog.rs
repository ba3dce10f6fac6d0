use anyhow::Context;
use regex::Regex;

/// The three unified log families found under `var/log` in a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LogSource { Developer, Support, Syslog }

impl LogSource {
    pub const ALL: [LogSource; 3] = [LogSource::Developer, LogSource::Support, LogSource::Syslog];

    pub fn file_name(self) -> &'static str {
        match self {
            LogSource::Developer => "unified_developer.log",
            LogSource::Support => "unified_support.log",
            LogSource::Syslog => "unified_syslog.log",
        }
    }

    /// Glob covering the live file and its rotations (`.1`, `.2.gz`, ...).
    pub fn glob(self) -> String { format!("{}*", self.file_name()) }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DetectorKind { IrregularPing, ReactorStall, IrregularPulse, DnsFailure, SipSpam, AdapterReset, MartianSource }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    AppendLine { output: &'static str },
    IncrementCounter,
}

enum Matcher {
    Contains(&'static str),
    Pattern(Regex),
    Lookaround(fancy_regex::Regex),
    /// Kept only when both captured addresses are the same text.
    SameAddress(Regex),
}

impl Matcher {
    fn is_match(&self, line: &str) -> bool {
        match self {
            Matcher::Contains(needle) => line.contains(needle),
            Matcher::Pattern(re) => re.is_match(line),
            Matcher::Lookaround(re) => match re.is_match(line) {
                Ok(m) => m,
                Err(e) => { log::warn!("pattern evaluation gave up on a line, treating it as no match: {}", e); false }
            },
            Matcher::SameAddress(re) => re.captures_iter(line).any(|c| match (c.get(1), c.get(2)) {
                (Some(a), Some(b)) => a.as_str() == b.as_str(),
                _ => false,
            }),
        }
    }
}

pub struct Detector {
    pub kind: DetectorKind,
    pub name: &'static str,
    pub source: LogSource,
    pub action: Action,
    /// Wording used in the summary line.
    pub label: &'static str,
    matcher: Matcher,
}

impl Detector {
    pub fn matches(&self, line: &str) -> bool { self.matcher.is_match(line) }
}

impl std::fmt::Debug for Detector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Detector").field("name", &self.name).field("source", &self.source).field("action", &self.action).finish()
    }
}

const IRREGULAR_PING: &str = r"Irregular ping detected.+\(\d[1-9]+\.\d[0-9].+sec\)";
const DNS_FAILURE: &str = r#"Name="support\.dns"(?:(?!\bAAAA\b).)*?Result="""#;
const ADAPTER_RESET: &str = r"e1000.*Reset adapter";
const MARTIAN_SOURCE: &str = r"IPv4: martian source (\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}) from (\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}), on dev eth\d";
const SUSPECT_USER_AGENTS: &str = r#"\bDetail="\^MINVITE\b.+User-Agent: (Asterisk PBX|CSipSimple|custom|friendly-request|friendly-scanner|iWar|Gulp|pplsip|siparmyknife|sipcli|sipptk|sipsak|sipsscuser|sipv|sipvicious|sip-scan|SIVuS|smap|sundayddr|Test Agent|UsaAirport|VaxIPUserAgent|VaxSIPUserAgent)"#;

/// Fixed, ordered set of detectors. Declaration order is also summary order.
pub struct Catalog {
    detectors: Vec<Detector>,
}

impl Catalog {
    pub fn new() -> anyhow::Result<Self> {
        let compile = |p: &str| Regex::new(p).with_context(|| format!("compiling detector pattern {}", p));
        let detectors = vec![
            Detector { kind: DetectorKind::IrregularPing, name: "irregular-ping", source: LogSource::Developer, action: Action::AppendLine { output: "pex_health_irregular_ping.log" }, label: "Irregular pings", matcher: Matcher::Pattern(compile(IRREGULAR_PING)?) },
            Detector { kind: DetectorKind::ReactorStall, name: "reactor-stall", source: LogSource::Developer, action: Action::AppendLine { output: "pex_health_reactor_stalling.log" }, label: "Reactor stalls", matcher: Matcher::Contains("Reactor stalling") },
            Detector { kind: DetectorKind::IrregularPulse, name: "irregular-pulse", source: LogSource::Support, action: Action::AppendLine { output: "pex_health_irregular_pulse.log" }, label: "Irregular pulse durations", matcher: Matcher::Contains("Irregular pulse duration detected") },
            Detector {
                kind: DetectorKind::DnsFailure,
                name: "dns-failure",
                source: LogSource::Support,
                action: Action::AppendLine { output: "pex_report_dns_failures.log" },
                label: "DNS failures",
                matcher: Matcher::Lookaround(fancy_regex::Regex::new(DNS_FAILURE).with_context(|| format!("compiling detector pattern {}", DNS_FAILURE))?),
            },
            Detector { kind: DetectorKind::SipSpam, name: "sip-spam", source: LogSource::Support, action: Action::IncrementCounter, label: "SIP INVITEs", matcher: Matcher::Pattern(compile(SUSPECT_USER_AGENTS)?) },
            Detector { kind: DetectorKind::AdapterReset, name: "adapter-reset", source: LogSource::Syslog, action: Action::AppendLine { output: "pex_health_adapter_resets.log" }, label: "Adapter resets", matcher: Matcher::Pattern(compile(ADAPTER_RESET)?) },
            Detector { kind: DetectorKind::MartianSource, name: "martian-source", source: LogSource::Syslog, action: Action::AppendLine { output: "pex_health_martian_sources.log" }, label: "Possible duplicate IPv4 addresses", matcher: Matcher::SameAddress(compile(MARTIAN_SOURCE)?) },
        ];
        Ok(Self { detectors })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Detector> { self.detectors.iter() }

    pub fn for_source(&self, source: LogSource) -> impl Iterator<Item = &Detector> {
        self.detectors.iter().filter(move |d| d.source == source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(kind: DetectorKind) -> Detector {
        let cat = Catalog::new().unwrap();
        let idx = cat.detectors.iter().position(|d| d.kind == kind).unwrap();
        let mut v = cat.detectors;
        v.swap_remove(idx)
    }

    #[test]
    fn irregular_ping_needs_duration() {
        let d = det(DetectorKind::IrregularPing);
        assert!(d.matches("2019-02-01 Level=\"WARNING\" Irregular ping detected (12.34 sec)"));
        assert!(d.matches("Irregular ping detected from node (219.05 sec)"));
        assert!(!d.matches("Irregular ping detected"));
        assert!(!d.matches("Irregular ping detected (0.5 sec)"));
    }

    #[test]
    fn substring_detectors() {
        assert!(det(DetectorKind::ReactorStall).matches("Reactor stalling for 3s"));
        assert!(!det(DetectorKind::ReactorStall).matches("reactor stalling"));
        assert!(det(DetectorKind::IrregularPulse).matches("x Irregular pulse duration detected y"));
    }

    #[test]
    fn dns_failure_skips_aaaa_lookups() {
        let d = det(DetectorKind::DnsFailure);
        assert!(d.matches(r#"Name="support.dns" Message="lookup" Type="A" Result="""#));
        assert!(!d.matches(r#"Name="support.dns" Message="lookup" Type="AAAA" Result="""#));
        assert!(!d.matches(r#"Name="support.dns" Type="A" Result="10.0.0.1""#));
        assert!(!d.matches(r#"Name="support.sip" Type="A" Result="""#));
        assert!(d.matches(r#"Name="support.dns" Type="AAAAB" Result="""#));
    }

    #[test]
    fn lookaround_over_backtrack_limit_is_no_match() {
        let re = fancy_regex::RegexBuilder::new(DNS_FAILURE).backtrack_limit(1).build().unwrap();
        let line = format!(r#"Name="support.dns" Type="A" {} Result="""#, "x".repeat(64));
        assert!(re.is_match(&line).is_err());
        assert!(!Matcher::Lookaround(re).is_match(&line));
    }

    #[test]
    fn sip_spam_requires_invite_detail() {
        let d = det(DetectorKind::SipSpam);
        assert_eq!(d.action, Action::IncrementCounter);
        assert!(d.matches(r#"Name="support.sip" Detail="^MINVITE sip:100@10.0.0.1 SIP/2.0^M^JUser-Agent: friendly-scanner^M""#));
        assert!(d.matches(r#"Detail="^MINVITE sip:1@x SIP/2.0 User-Agent: sipvicious""#));
        assert!(!d.matches(r#"Detail="^MINVITE sip:1@x SIP/2.0 User-Agent: Pexip Infinity""#));
        assert!(!d.matches(r#"Detail="^MOPTIONS sip:1@x SIP/2.0 User-Agent: sipvicious""#));
    }

    #[test]
    fn adapter_reset() {
        let d = det(DetectorKind::AdapterReset);
        assert!(d.matches("kernel: e1000 0000:02:01.0 eth0: Reset adapter"));
        assert!(!d.matches("kernel: vmxnet3 eth0: Reset adapter"));
    }

    #[test]
    fn martian_source_only_when_addresses_equal() {
        let d = det(DetectorKind::MartianSource);
        assert!(d.matches("Feb  1 kernel: IPv4: martian source 10.0.0.5 from 10.0.0.5, on dev eth0"));
        assert!(!d.matches("Feb  1 kernel: IPv4: martian source 10.0.0.5 from 10.0.0.9, on dev eth0"));
        assert!(!d.matches("Feb  1 kernel: IPv4: martian source 10.0.0.5 from 10.0.0.55, on dev eth0"));
        assert!(!d.matches("IPv4: martian destination 10.0.0.5 from 10.0.0.5, dev eth0"));
    }

    #[test]
    fn sources_partition_catalog() {
        let cat = Catalog::new().unwrap();
        let dev: Vec<&str> = cat.for_source(LogSource::Developer).map(|d| d.name).collect();
        let sup: Vec<&str> = cat.for_source(LogSource::Support).map(|d| d.name).collect();
        let sys: Vec<&str> = cat.for_source(LogSource::Syslog).map(|d| d.name).collect();
        assert_eq!(dev, vec!["irregular-ping", "reactor-stall"]);
        assert_eq!(sup, vec!["irregular-pulse", "dns-failure", "sip-spam"]);
        assert_eq!(sys, vec!["adapter-reset", "martian-source"]);
        assert_eq!(cat.iter().count(), 7);
        assert_eq!(LogSource::Support.glob(), "unified_support.log*");
    }
}
