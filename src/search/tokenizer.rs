//! Tokenizer - jieba-rs for CJK runs, Unicode word split otherwise / 分词器
//!
//! Supports / 支持：
//! - Chinese word segmentation (jieba) / 中文分词
//! - Latin, Cyrillic and other alphabetic scripts (lowercased words) / 字母文字分词
//! - Mixed text processing / 混合文本处理

use jieba_rs::Jieba;
use once_cell::sync::Lazy;

/// Global jieba tokenizer instance / 全局 jieba 分词器实例
static JIEBA: Lazy<Jieba> = Lazy::new(Jieba::new);

/// Whether `c` is a CJK character / 是否为 CJK 字符
pub fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{4e00}'..='\u{9fff}' |  // CJK Unified Ideographs
        '\u{3400}'..='\u{4dbf}' |  // CJK Extension A
        '\u{3040}'..='\u{309f}' |  // Hiragana
        '\u{30a0}'..='\u{30ff}' |  // Katakana
        '\u{ac00}'..='\u{d7af}'    // Hangul Syllables
    )
}

/// Check if text contains CJK characters / 检测文本是否包含CJK字符
pub fn contains_cjk(text: &str) -> bool {
    text.chars().any(is_cjk)
}

/// Tokenize text / 对文本进行分词
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut run = String::new();
    let mut run_is_cjk = false;

    for c in text.chars() {
        let cjk = is_cjk(c);
        if !run.is_empty() && cjk != run_is_cjk {
            push_run(&run, run_is_cjk, &mut tokens);
            run.clear();
        }
        run_is_cjk = cjk;
        run.push(c);
    }
    if !run.is_empty() {
        push_run(&run, run_is_cjk, &mut tokens);
    }
    tokens
}

fn push_run(run: &str, cjk: bool, tokens: &mut Vec<String>) {
    if cjk {
        // Search mode gives finer granularity / 搜索模式，粒度更细
        for word in JIEBA.cut_for_search(run, true) {
            let word = word.trim();
            if !word.is_empty() {
                tokens.push(word.to_lowercase());
            }
        }
    } else {
        for word in run.split(|c: char| !c.is_alphanumeric()) {
            if !word.is_empty() {
                tokens.push(word.to_lowercase());
            }
        }
    }
}

/// Tokenize search query (used for queries) / 对搜索查询进行分词
pub fn tokenize_query(query: &str) -> Vec<String> {
    // Query tokenization consistent with index tokenization / 查询分词与索引分词保持一致
    tokenize(query)
}

/// Generate N-grams (for fuzzy matching) / 生成 N-gram
///
/// Example: "测试" -> ["测", "试", "测试"] / 例如
pub fn generate_ngrams(text: &str, min_n: usize, max_n: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    let mut ngrams = Vec::new();

    for n in min_n.max(1)..=max_n {
        if n > chars.len() {
            break;
        }
        for window in chars.windows(n) {
            ngrams.push(window.iter().collect::<String>().to_lowercase());
        }
    }
    ngrams
}
