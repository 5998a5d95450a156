#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Sentence extraction scenarios through the public API.

use narrate::Extractor;

#[test]
fn abbreviation_suppression_scenario() {
    let doc = Extractor::new().parse("Dr. Smith went home. She was tired.");
    let texts: Vec<&str> = doc.sentences().iter().map(|s| s.text.as_str()).collect();
    assert_eq!(texts, vec!["Dr. Smith went home.", "She was tired."]);
}

#[test]
fn code_block_exclusion_scenario() {
    let md = "\
The setup is simple.

```sh
rm -rf / # never spoken
```

The teardown is simpler.
";
    let doc = Extractor::new().parse(md);
    assert_eq!(doc.len(), 2);
    for s in doc.sentences() {
        assert!(!s.text.contains("rm -rf"));
    }
}

#[test]
fn source_spans_stay_inside_the_document() {
    let md = "# A Title\n\nPlain text with [a link](https://x.test) and `code`.\n\n- bullet one\n- bullet two\n\n> A quote. Another thought.\n";
    let doc = Extractor::new().parse(md);
    assert!(!doc.is_empty());
    for s in doc.sentences() {
        assert!(s.source_span.end <= md.len(), "span past end for {:?}", s.text);
        assert!(s.source_span.start <= s.source_span.end);
    }
}

#[test]
fn reparsing_the_same_markdown_is_stable() {
    let md = "One sentence. Two sentences! Three sentences? Done.";
    let extractor = Extractor::new();
    let first = extractor.parse(md);
    let second = extractor.parse(md);
    let a: Vec<_> = first.sentences().iter().map(|s| (&s.text, s.index)).collect();
    let b: Vec<_> = second.sentences().iter().map(|s| (&s.text, s.index)).collect();
    assert_eq!(a, b);
}

#[test]
fn empty_markdown_means_no_document() {
    assert!(Extractor::new().parse("").is_empty());
    assert!(Extractor::new().parse("```\nonly code\n```").is_empty());
}
