use super::IndexDocument;
use crate::config::IndexConfig;
use crate::error::IndexError;
use crate::logging::LogContext;
use lazy_static::lazy_static;
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::{Method, StatusCode, Url};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

/// 搜索结果里正文的最大长度（字符数），超出部分以 "..." 结尾
const HIT_CONTENT_CHARS: usize = 300;

lazy_static! {
    static ref DEFAULT_SCHEMA: Value =
        serde_json::from_str(include_str!("../../data/index_schema.json")).expect("bundled index schema is valid JSON");
}

/// 内置的索引设置和映射
pub fn default_schema() -> Value {
    DEFAULT_SCHEMA.clone()
}

/// 搜索过滤条件（全部可选，按 AND 组合）
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub author: Option<String>,
    pub language: Option<String>,
    pub book_title: Option<String>,
    pub tags: Vec<String>,
}

/// 搜索请求
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub size: usize,
    pub filters: SearchFilters,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            size: 10,
            filters: SearchFilters::default(),
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = size;
        self
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }
}

/// 单条命中
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub score: f64,
    pub book_title: String,
    pub chapter_title: String,
    pub content: String,
    pub page_number: u32,
    pub author: String,
    pub tags: Vec<String>,
    pub highlights: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchResults {
    pub total_hits: u64,
    pub max_score: Option<f64>,
    pub hits: Vec<SearchHit>,
}

/// 索引统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BookStats {
    pub total_documents: u64,
    /// 书名 -> 文档数
    pub books: BTreeMap<String, u64>,
    pub authors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthStatus {
    pub cluster_name: String,
    pub cluster_status: String,
    pub index_exists: bool,
    pub document_count: u64,
}

/// 搜索索引协作方
///
/// 每次写入相互独立，以 `paragraph_id` 为文档 ID，重复写入是幂等的。
pub trait SearchIndex: Send + Sync {
    /// 创建索引；已存在时返回 Ok(false)
    fn create_index(&self, schema: &Value) -> Result<bool, IndexError>;

    fn index_document(&self, document: &IndexDocument) -> Result<(), IndexError>;

    fn search(&self, query: &SearchQuery) -> Result<SearchResults, IndexError>;

    /// 删除某个字段等于给定值的全部文档，返回删除数量
    fn delete_by_field(&self, field: &str, value: &str) -> Result<u64, IndexError>;

    fn book_stats(&self) -> Result<BookStats, IndexError>;

    fn health_check(&self) -> Result<HealthStatus, IndexError>;
}

/// 一本书的写入结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub indexed: usize,
    pub failed: usize,
}

/// 逐个写入文档，单个失败只记录并计数，不影响其余文档
pub fn index_book(index: &dyn SearchIndex, documents: &[IndexDocument], log: &LogContext) -> IndexReport {
    let mut report = IndexReport::default();

    for document in documents {
        match index.index_document(document) {
            Ok(()) => report.indexed += 1,
            Err(e) => {
                log::error!(target: log.target(), "failed to index {}: {}", document.paragraph_id, e);
                report.failed += 1;
            }
        }
    }

    log::info!(
        target: log.target(),
        "indexed {} documents, {} failed",
        report.indexed,
        report.failed
    );
    report
}

/// 构建搜索请求体：多字段加权匹配 + 短语匹配，过滤条件放在 bool.filter
pub fn build_search_body(query: &SearchQuery) -> Value {
    let mut body = json!({
        "size": query.size,
        "query": {
            "bool": {
                "should": [
                    {
                        "multi_match": {
                            "query": query.text,
                            "fields": ["content^2", "chapter_title^1.5", "book_title", "tags^1.2"],
                            "type": "best_fields",
                            "fuzziness": "AUTO"
                        }
                    },
                    {
                        "match_phrase": {
                            "content": { "query": query.text, "boost": 2 }
                        }
                    }
                ],
                "minimum_should_match": 1
            }
        },
        "highlight": {
            "fields": {
                "content": { "fragment_size": 150, "number_of_fragments": 3 }
            }
        },
        "_source": ["book_title", "chapter_title", "content", "page_number", "author", "tags", "paragraph_number"],
        "sort": [{ "_score": { "order": "desc" } }]
    });

    let filters = &query.filters;
    let mut conditions = Vec::new();
    if let Some(book_title) = &filters.book_title {
        conditions.push(json!({ "term": { "book_title.keyword": book_title } }));
    }
    if let Some(author) = &filters.author {
        conditions.push(json!({ "term": { "author": author } }));
    }
    if let Some(language) = &filters.language {
        conditions.push(json!({ "term": { "language": language } }));
    }
    if !filters.tags.is_empty() {
        conditions.push(json!({ "terms": { "tags": filters.tags } }));
    }
    if !conditions.is_empty() {
        body["query"]["bool"]["filter"] = Value::Array(conditions);
    }

    body
}

/// 解析 `_search` 响应
pub fn parse_search_response(response: &Value) -> SearchResults {
    let hits = &response["hits"];
    let results = hits["hits"]
        .as_array()
        .map(|hits| hits.iter().map(parse_hit).collect())
        .unwrap_or_default();

    SearchResults {
        total_hits: hits["total"]["value"].as_u64().unwrap_or(0),
        max_score: hits["max_score"].as_f64(),
        hits: results,
    }
}

fn parse_hit(hit: &Value) -> SearchHit {
    let source = &hit["_source"];
    let text = |key: &str| source[key].as_str().unwrap_or_default().to_string();
    let strings = |value: &Value| -> Vec<String> {
        value
            .as_array()
            .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    };

    SearchHit {
        score: hit["_score"].as_f64().unwrap_or(0.0),
        book_title: text("book_title"),
        chapter_title: text("chapter_title"),
        content: truncate_content(source["content"].as_str().unwrap_or_default()),
        page_number: source["page_number"].as_u64().unwrap_or(0) as u32,
        author: text("author"),
        tags: strings(&source["tags"]),
        highlights: strings(&hit["highlight"]["content"]),
    }
}

fn truncate_content(content: &str) -> String {
    if content.chars().count() > HIT_CONTENT_CHARS {
        let mut truncated: String = content.chars().take(HIT_CONTENT_CHARS).collect();
        truncated.push_str("...");
        truncated
    } else {
        content.to_string()
    }
}

fn parse_stats(count: &Value, aggregations: &Value) -> BookStats {
    let buckets = |name: &str| -> Vec<(String, u64)> {
        aggregations["aggregations"][name]["buckets"]
            .as_array()
            .map(|buckets| {
                buckets
                    .iter()
                    .filter_map(|b| Some((b["key"].as_str()?.to_string(), b["doc_count"].as_u64().unwrap_or(0))))
                    .collect()
            })
            .unwrap_or_default()
    };

    BookStats {
        total_documents: count["count"].as_u64().unwrap_or(0),
        books: buckets("unique_books").into_iter().collect(),
        authors: buckets("unique_authors").into_iter().map(|(key, _)| key).collect(),
    }
}

/// OpenSearch REST 客户端（阻塞式）
///
/// 用户名和密码都配置时使用 Basic 认证。
pub struct OpenSearchClient {
    http: Client,
    base_url: Url,
    index_name: String,
    credentials: Option<(String, String)>,
    log: LogContext,
}

impl OpenSearchClient {
    pub fn new(config: &IndexConfig) -> Result<Self, IndexError> {
        let base_url = Url::parse(&config.url).map_err(|e| IndexError::InvalidUrl(format!("{}: {}", config.url, e)))?;
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;

        let credentials = match (&config.username, &config.password) {
            (Some(user), Some(password)) if !user.trim().is_empty() && !password.trim().is_empty() => {
                Some((user.trim().to_string(), password.trim().to_string()))
            }
            _ => None,
        };

        let log = LogContext::new("shastra::index");
        if credentials.is_some() {
            log::info!(target: log.target(), "using basic authentication for {}", base_url);
        }

        Ok(Self {
            http,
            base_url,
            index_name: config.index_name.clone(),
            credentials,
            log,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// 拼接 URL，每一段单独转义
    fn url(&self, segments: &[&str]) -> Result<Url, IndexError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| IndexError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn index_url(&self, segments: &[&str]) -> Result<Url, IndexError> {
        let mut all = vec![self.index_name.as_str()];
        all.extend_from_slice(segments);
        self.url(&all)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    fn send_json(&self, builder: RequestBuilder) -> Result<Value, IndexError> {
        let response = builder.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(IndexError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json()?)
    }

    fn index_exists(&self) -> Result<bool, IndexError> {
        let response = self.request(Method::HEAD, self.index_url(&[])?).send()?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(IndexError::Status {
                status: status.as_u16(),
                body: String::new(),
            }),
        }
    }

    fn count(&self) -> Result<Value, IndexError> {
        self.send_json(self.request(Method::GET, self.index_url(&["_count"])?))
    }
}

impl SearchIndex for OpenSearchClient {
    fn create_index(&self, schema: &Value) -> Result<bool, IndexError> {
        if self.index_exists()? {
            log::info!(target: self.log.target(), "index {} already exists", self.index_name);
            return Ok(false);
        }

        let body = json!({
            "settings": schema.get("settings").cloned().unwrap_or_else(|| json!({})),
            "mappings": schema.get("mappings").cloned().unwrap_or_else(|| json!({})),
        });
        match self.send_json(self.request(Method::PUT, self.index_url(&[])?).json(&body)) {
            Ok(_) => {
                log::info!(target: self.log.target(), "created index {}", self.index_name);
                Ok(true)
            }
            Err(IndexError::Status { body, .. }) if body.contains("resource_already_exists_exception") => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn index_document(&self, document: &IndexDocument) -> Result<(), IndexError> {
        let mut url = self.index_url(&["_doc", &document.paragraph_id])?;
        url.query_pairs_mut().append_pair("refresh", "true");

        let response = self.send_json(self.request(Method::PUT, url).json(document))?;
        match response["result"].as_str() {
            Some("created") | Some("updated") => {
                log::debug!(target: self.log.target(), "indexed {}", document.paragraph_id);
                Ok(())
            }
            other => Err(IndexError::Rejected(format!(
                "{}: unexpected result {:?}",
                document.paragraph_id, other
            ))),
        }
    }

    fn search(&self, query: &SearchQuery) -> Result<SearchResults, IndexError> {
        let body = build_search_body(query);
        let response = self.send_json(self.request(Method::POST, self.index_url(&["_search"])?).json(&body))?;
        Ok(parse_search_response(&response))
    }

    fn delete_by_field(&self, field: &str, value: &str) -> Result<u64, IndexError> {
        let mut url = self.index_url(&["_delete_by_query"])?;
        url.query_pairs_mut().append_pair("refresh", "true");

        let body = json!({ "query": { "term": { field: value } } });
        let response = self.send_json(self.request(Method::POST, url).json(&body))?;
        let deleted = response["deleted"].as_u64().unwrap_or(0);
        log::info!(target: self.log.target(), "deleted {} documents where {} = {:?}", deleted, field, value);
        Ok(deleted)
    }

    fn book_stats(&self) -> Result<BookStats, IndexError> {
        let count = self.count()?;
        let body = json!({
            "size": 0,
            "aggs": {
                "unique_books": { "terms": { "field": "book_title.keyword", "size": 100 } },
                "unique_authors": { "terms": { "field": "author", "size": 50 } }
            }
        });
        let aggregations = self.send_json(self.request(Method::POST, self.index_url(&["_search"])?).json(&body))?;
        Ok(parse_stats(&count, &aggregations))
    }

    fn health_check(&self) -> Result<HealthStatus, IndexError> {
        let health = self.send_json(self.request(Method::GET, self.url(&["_cluster", "health"])?))?;
        let index_exists = self.index_exists()?;
        let document_count = if index_exists {
            self.count()?["count"].as_u64().unwrap_or(0)
        } else {
            0
        };

        Ok(HealthStatus {
            cluster_name: health["cluster_name"].as_str().unwrap_or_default().to_string(),
            cluster_status: health["status"].as_str().unwrap_or_default().to_string(),
            index_exists,
            document_count,
        })
    }
}

/// 内存索引，用于测试和离线试运行
///
/// 打分只是简单的加权词频，字段权重与 OpenSearch 查询一致。
#[derive(Debug, Default)]
pub struct MemoryIndex {
    documents: Mutex<BTreeMap<String, IndexDocument>>,
    created: Mutex<bool>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, paragraph_id: &str) -> Option<IndexDocument> {
        self.documents.lock().ok()?.get(paragraph_id).cloned()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, IndexDocument>>, IndexError> {
        self.documents
            .lock()
            .map_err(|e| IndexError::Rejected(format!("memory index poisoned: {}", e)))
    }

    fn field_value(document: &IndexDocument, field: &str) -> Option<String> {
        match field {
            "book_id" => Some(document.book_id.clone()),
            "book_title" | "book_title.keyword" => Some(document.book_title.clone()),
            "author" => Some(document.author.clone()),
            "language" => Some(document.language.to_string()),
            "file_path" => Some(document.file_path.clone()),
            "chapter_title" => Some(document.chapter_title.clone()),
            _ => None,
        }
    }

    fn matches_filters(document: &IndexDocument, filters: &SearchFilters) -> bool {
        filters.author.as_ref().map_or(true, |a| &document.author == a)
            && filters.language.as_ref().map_or(true, |l| document.language.as_str() == l)
            && filters.book_title.as_ref().map_or(true, |t| &document.book_title == t)
            && (filters.tags.is_empty() || filters.tags.iter().any(|t| document.tags.contains(t)))
    }

    fn score(document: &IndexDocument, terms: &[String]) -> f64 {
        let occurrences = |text: &str| -> f64 {
            let lower = text.to_lowercase();
            terms.iter().map(|t| lower.matches(t.as_str()).count() as f64).sum()
        };
        let tags = document.tags.iter().cloned().collect::<Vec<_>>().join(" ");

        2.0 * occurrences(&document.content)
            + 1.5 * occurrences(&document.chapter_title)
            + occurrences(&document.book_title)
            + 1.2 * occurrences(&tags)
    }
}

impl SearchIndex for MemoryIndex {
    fn create_index(&self, _schema: &Value) -> Result<bool, IndexError> {
        let mut created = self
            .created
            .lock()
            .map_err(|e| IndexError::Rejected(format!("memory index poisoned: {}", e)))?;
        let first = !*created;
        *created = true;
        Ok(first)
    }

    fn index_document(&self, document: &IndexDocument) -> Result<(), IndexError> {
        if document.paragraph_id.is_empty() {
            return Err(IndexError::Rejected("empty paragraph_id".to_string()));
        }
        self.lock()?.insert(document.paragraph_id.clone(), document.clone());
        Ok(())
    }

    fn search(&self, query: &SearchQuery) -> Result<SearchResults, IndexError> {
        let terms: Vec<String> = query.text.split_whitespace().map(str::to_lowercase).collect();
        let documents = self.lock()?;

        let mut scored: Vec<(f64, &IndexDocument)> = documents
            .values()
            .filter(|d| Self::matches_filters(d, &query.filters))
            .map(|d| (Self::score(d, &terms), d))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));

        Ok(SearchResults {
            total_hits: scored.len() as u64,
            max_score: scored.first().map(|(score, _)| *score),
            hits: scored
                .into_iter()
                .take(query.size)
                .map(|(score, d)| SearchHit {
                    score,
                    book_title: d.book_title.clone(),
                    chapter_title: d.chapter_title.clone(),
                    content: truncate_content(&d.content),
                    page_number: d.page_number,
                    author: d.author.clone(),
                    tags: d.tags.iter().cloned().collect(),
                    highlights: Vec::new(),
                })
                .collect(),
        })
    }

    fn delete_by_field(&self, field: &str, value: &str) -> Result<u64, IndexError> {
        let mut documents = self.lock()?;
        let before = documents.len();
        let mut unsupported = false;
        documents.retain(|_, d| match Self::field_value(d, field) {
            Some(v) => v != value,
            None => {
                unsupported = true;
                true
            }
        });
        if unsupported {
            return Err(IndexError::Rejected(format!("cannot delete by field {}", field)));
        }
        Ok((before - documents.len()) as u64)
    }

    fn book_stats(&self) -> Result<BookStats, IndexError> {
        let documents = self.lock()?;
        let mut stats = BookStats {
            total_documents: documents.len() as u64,
            ..BookStats::default()
        };
        for document in documents.values() {
            *stats.books.entry(document.book_title.clone()).or_insert(0) += 1;
            if !stats.authors.contains(&document.author) {
                stats.authors.push(document.author.clone());
            }
        }
        Ok(stats)
    }

    fn health_check(&self) -> Result<HealthStatus, IndexError> {
        let index_exists = self
            .created
            .lock()
            .map(|created| *created)
            .map_err(|e| IndexError::Rejected(format!("memory index poisoned: {}", e)))?;
        Ok(HealthStatus {
            cluster_name: "memory".to_string(),
            cluster_status: "green".to_string(),
            index_exists,
            document_count: self.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Language;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn document(id: &str, book: &str, author: &str, content: &str) -> IndexDocument {
        IndexDocument {
            book_id: format!("{}-0000", book.to_lowercase()),
            book_title: book.to_string(),
            author: author.to_string(),
            language: Language::English,
            chapter_title: "Introduction".to_string(),
            chapter_number: 1,
            page_start: 1,
            page_end: 3,
            file_path: format!("{}.pdf", book),
            timestamp: Utc::now(),
            total_pages: 3,
            content: content.to_string(),
            paragraph_id: id.to_string(),
            paragraph_number: 1,
            page_number: 2,
            tags: BTreeSet::from(["bhakti".to_string()]),
            content_length: content.chars().count(),
            word_count: content.split_whitespace().count(),
            is_summary: false,
        }
    }

    #[test]
    fn test_default_schema_has_mappings() {
        let schema = default_schema();
        assert_eq!(schema["mappings"]["properties"]["paragraph_id"]["type"], "keyword");
        assert_eq!(schema["mappings"]["properties"]["is_summary"]["type"], "boolean");
    }

    #[test]
    fn test_search_body_with_filters() {
        let query = SearchQuery::new("holy name").with_size(5).with_filters(SearchFilters {
            author: Some("Srila Narayan Maharaj".to_string()),
            language: Some("English".to_string()),
            book_title: None,
            tags: vec!["bhakti".to_string()],
        });
        let body = build_search_body(&query);

        assert_eq!(body["size"], 5);
        assert_eq!(body["query"]["bool"]["should"][0]["multi_match"]["query"], "holy name");
        assert_eq!(body["query"]["bool"]["should"][0]["multi_match"]["fields"][0], "content^2");
        let filter = body["query"]["bool"]["filter"].as_array().unwrap();
        assert_eq!(filter.len(), 3);
        assert_eq!(filter[0]["term"]["author"], "Srila Narayan Maharaj");
        assert_eq!(filter[2]["terms"]["tags"][0], "bhakti");
    }

    #[test]
    fn test_search_body_without_filters() {
        let body = build_search_body(&SearchQuery::new("prema"));
        assert_eq!(body["size"], 10);
        assert!(body["query"]["bool"].get("filter").is_none());
    }

    #[test]
    fn test_parse_search_response() {
        let long = "x".repeat(400);
        let response = json!({
            "hits": {
                "total": { "value": 2 },
                "max_score": 3.5,
                "hits": [
                    {
                        "_score": 3.5,
                        "_source": {
                            "book_title": "Jaiva Dharma",
                            "chapter_title": "Chapter 1",
                            "content": long,
                            "page_number": 12,
                            "author": "Srila Bhaktivinoda Thakura",
                            "tags": ["bhakti", "guru"]
                        },
                        "highlight": { "content": ["<em>bhakti</em> is eternal"] }
                    },
                    { "_score": 1.0, "_source": { "book_title": "Other" } }
                ]
            }
        });

        let results = parse_search_response(&response);
        assert_eq!(results.total_hits, 2);
        assert_eq!(results.max_score, Some(3.5));
        assert_eq!(results.hits.len(), 2);
        assert_eq!(results.hits[0].content.chars().count(), HIT_CONTENT_CHARS + 3);
        assert!(results.hits[0].content.ends_with("..."));
        assert_eq!(results.hits[0].page_number, 12);
        assert_eq!(results.hits[0].tags, vec!["bhakti", "guru"]);
        assert_eq!(results.hits[0].highlights.len(), 1);
        assert_eq!(results.hits[1].author, "");
    }

    #[test]
    fn test_parse_stats() {
        let count = json!({ "count": 42 });
        let aggregations = json!({
            "aggregations": {
                "unique_books": { "buckets": [{ "key": "Jaiva Dharma", "doc_count": 30 }, { "key": "Prema Pradipa", "doc_count": 12 }] },
                "unique_authors": { "buckets": [{ "key": "Srila Bhaktivinoda Thakura", "doc_count": 42 }] }
            }
        });

        let stats = parse_stats(&count, &aggregations);
        assert_eq!(stats.total_documents, 42);
        assert_eq!(stats.books.get("Jaiva Dharma"), Some(&30));
        assert_eq!(stats.authors, vec!["Srila Bhaktivinoda Thakura"]);
    }

    #[test]
    fn test_client_rejects_invalid_url() {
        let config = IndexConfig {
            url: "not a url".to_string(),
            ..IndexConfig::default()
        };
        assert!(matches!(OpenSearchClient::new(&config), Err(IndexError::InvalidUrl(_))));
    }

    #[test]
    fn test_client_url_escapes_segments() {
        let client = OpenSearchClient::new(&IndexConfig::default()).unwrap();
        let url = client.index_url(&["_doc", "book id_0_1"]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:9200/srila-narayan-maharaj-books/_doc/book%20id_0_1");
    }

    #[test]
    fn test_memory_index_roundtrip() {
        let index = MemoryIndex::new();
        assert!(index.create_index(&default_schema()).unwrap());
        assert!(!index.create_index(&default_schema()).unwrap());

        index.index_document(&document("a_0_0", "Jaiva Dharma", "Thakura", "bhakti is the eternal dharma")).unwrap();
        index.index_document(&document("a_0_0", "Jaiva Dharma", "Thakura", "bhakti is the eternal dharma")).unwrap();
        index.index_document(&document("b_0_0", "Prema Pradipa", "Thakura", "prema is the goal")).unwrap();
        assert_eq!(index.len(), 2);

        let results = index.search(&SearchQuery::new("bhakti")).unwrap();
        assert_eq!(results.total_hits, 2);
        assert_eq!(results.hits[0].book_title, "Jaiva Dharma");

        let filtered = index
            .search(&SearchQuery::new("bhakti").with_filters(SearchFilters {
                book_title: Some("Prema Pradipa".to_string()),
                ..SearchFilters::default()
            }))
            .unwrap();
        assert_eq!(filtered.total_hits, 1);

        let stats = index.book_stats().unwrap();
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.books.get("Prema Pradipa"), Some(&1));

        assert_eq!(index.delete_by_field("book_title", "Jaiva Dharma").unwrap(), 1);
        assert_eq!(index.len(), 1);
        assert!(index.delete_by_field("content", "x").is_err());
        assert!(index.health_check().unwrap().index_exists);
    }

    struct FlakyIndex;

    impl SearchIndex for FlakyIndex {
        fn create_index(&self, _schema: &Value) -> Result<bool, IndexError> {
            Ok(true)
        }

        fn index_document(&self, document: &IndexDocument) -> Result<(), IndexError> {
            if document.paragraph_id.ends_with('1') {
                Err(IndexError::Rejected("mapping conflict".to_string()))
            } else {
                Ok(())
            }
        }

        fn search(&self, _query: &SearchQuery) -> Result<SearchResults, IndexError> {
            Ok(SearchResults::default())
        }

        fn delete_by_field(&self, _field: &str, _value: &str) -> Result<u64, IndexError> {
            Ok(0)
        }

        fn book_stats(&self) -> Result<BookStats, IndexError> {
            Ok(BookStats::default())
        }

        fn health_check(&self) -> Result<HealthStatus, IndexError> {
            Err(IndexError::Rejected("offline".to_string()))
        }
    }

    #[test]
    fn test_index_book_counts_failures() {
        let documents = vec![
            document("x_0_0", "Book", "A", "one"),
            document("x_0_1", "Book", "A", "two"),
            document("x_0_2", "Book", "A", "three"),
        ];
        let report = index_book(&FlakyIndex, &documents, &LogContext::default());
        assert_eq!(report, IndexReport { indexed: 2, failed: 1 });
    }
}
