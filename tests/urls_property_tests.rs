//! Property-based tests for URL normalization and domain helpers

use proptest::prelude::*;

use newswire::urls;

prop_compose! {
    fn arb_label()(label in "[a-z][a-z0-9]{0,8}") -> String {
        label
    }
}

prop_compose! {
    fn arb_host()(
        sub in prop::option::of(arb_label()),
        name in arb_label(),
        tld in prop_oneof![Just("com"), Just("org"), Just("net"), Just("io")],
    ) -> String {
        match sub {
            Some(sub) => format!("{sub}.{name}.{tld}"),
            None => format!("{name}.{tld}"),
        }
    }
}

prop_compose! {
    fn arb_url()(
        scheme in prop_oneof![Just("http"), Just("https")],
        www in any::<bool>(),
        host in arb_host(),
        segments in prop::collection::vec("[a-zA-Z0-9-]{1,10}", 0..4),
        tracking in any::<bool>(),
        param in prop::option::of("[a-z]{1,6}"),
    ) -> String {
        let mut url = format!("{scheme}://{}{host}", if www { "www." } else { "" });
        for segment in &segments {
            url.push('/');
            url.push_str(segment);
        }
        let mut params: Vec<String> = Vec::new();
        if tracking {
            params.push("utm_source=rss".to_string());
        }
        if let Some(p) = param {
            params.push(format!("{p}=1"));
        }
        if !params.is_empty() {
            url.push('?');
            url.push_str(&params.join("&"));
        }
        url
    }
}

proptest! {
    #[test]
    fn canonicalize_is_idempotent(url in arb_url()) {
        let once = urls::canonicalize(&url).unwrap();
        let twice = urls::canonicalize(&once).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn canonical_urls_never_keep_tracking_params(url in arb_url()) {
        let canonical = urls::canonicalize(&url).unwrap();
        prop_assert!(!canonical.contains("utm_"));
        // The www prefix is stripped from the host (but a mid-host "www"
        // label is a legitimate domain name).
        let host = canonical.split("://").nth(1).unwrap_or("");
        prop_assert!(!host.starts_with("www."));
    }

    #[test]
    fn url_hash_matches_hash_of_normalized_form(url in arb_url()) {
        let canonical = urls::canonicalize(&url).unwrap();
        // url_hash(u) == url_hash(normalize(u)) for already-canonical u.
        prop_assert_eq!(
            urls::url_hash(&canonical),
            urls::url_hash(&urls::canonicalize(&canonical).unwrap())
        );
    }

    #[test]
    fn etld1_is_idempotent(host in arb_host()) {
        let once = urls::etld1(&host);
        prop_assert_eq!(urls::etld1(&once), once.clone());
        // And the result has exactly two labels for plain TLDs.
        prop_assert_eq!(once.split('.').count(), 2);
    }

    #[test]
    fn text_hash_ignores_whitespace_layout(words in prop::collection::vec("[a-z]{1,8}", 1..20)) {
        let spaced = words.join(" ");
        let lined = words.join("\n");
        prop_assert_eq!(urls::text_hash(&spaced), urls::text_hash(&lined));
    }

    #[test]
    fn normalize_title_is_idempotent(title in "[a-zA-Z0-9 ,.!?:'-]{0,60}") {
        let once = urls::normalize_title(&title);
        prop_assert_eq!(urls::normalize_title(&once), once.clone());
    }
}

#[test]
fn second_level_suffix_hosts_keep_three_labels() {
    assert_eq!(urls::etld1("news.bbc.co.uk"), "bbc.co.uk");
    assert_eq!(urls::etld1(&urls::etld1("news.bbc.co.uk")), "bbc.co.uk");
}
