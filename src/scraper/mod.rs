//! 법령 스크래퍼 - 全國法規資料庫 조문 수집
//!
//! `LawAll.aspx?pcode=...` 페이지의 `div.row` 블록에서 조번호(`.col-no`)와
//! 조문 본문(`.col-data`)을 읽어 [`LawFragment`] 목록으로 변환합니다.
//! 삭제/폐지된 조문은 건너뜁니다.

use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::knowledge::LawFragment;

const LAW_ALL_URL: &str = "https://law.moj.gov.tw/LawClass/LawAll.aspx";

/// 일부 정부 사이트는 비브라우저 UA를 차단함
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// 법령 사이 대기 시간
const POLITE_DELAY: Duration = Duration::from_secs(1);

/// 기본 수집 대상 (pcode, 법령명)
pub const DEFAULT_TARGETS: &[(&str, &str)] = &[
    ("C0000001", "中華民國刑法"),
    ("K0040012", "道路交通管理處罰條例"),
    ("B0000001", "民法"),
];

/// 본문에 이 표시가 있으면 효력 없는 조문
const REPEALED_MARKERS: &[&str] = &["刪除", "廢止"];

/// 법령 스크래퍼
pub struct LawScraper {
    client: reqwest::Client,
    whitespace: Regex,
}

impl LawScraper {
    /// 새 스크래퍼 생성
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()
            .context("HTTP 클라이언트 생성 실패")?;
        let whitespace = Regex::new(r"\s+").context("정규식 컴파일 실패")?;

        Ok(Self { client, whitespace })
    }

    /// 법령 페이지 URL
    pub fn law_url(pcode: &str) -> Result<Url> {
        Url::parse_with_params(LAW_ALL_URL, &[("pcode", pcode)]).context("잘못된 법령 URL")
    }

    /// 법령 하나의 유효 조문 수집
    pub async fn fetch(&self, pcode: &str, law_name: &str) -> Result<Vec<LawFragment>> {
        let url = Self::law_url(pcode)?;
        tracing::info!("Fetching {} ({})", law_name, url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("HTTP 요청 실패")?
            .error_for_status()
            .context("법령 페이지 응답 오류")?;

        let html = response.text().await.context("응답 본문 읽기 실패")?;
        let fragments = self.parse_articles(&html, pcode, law_name);

        tracing::info!("Fetched {} articles from {}", fragments.len(), law_name);
        Ok(fragments)
    }

    /// 여러 법령 수집 (실패한 법령은 로그 후 건너뜀)
    pub async fn fetch_all(&self, targets: &[(&str, &str)]) -> Vec<LawFragment> {
        let mut all = Vec::new();

        for (i, (pcode, law_name)) in targets.iter().enumerate() {
            match self.fetch(pcode, law_name).await {
                Ok(fragments) => all.extend(fragments),
                Err(e) => tracing::warn!("Failed to fetch {} ({}): {:#}", law_name, pcode, e),
            }

            if i + 1 < targets.len() {
                tokio::time::sleep(POLITE_DELAY).await;
            }
        }

        all
    }

    /// 법령 페이지 HTML → 조문 목록
    pub fn parse_articles(&self, html: &str, pcode: &str, law_name: &str) -> Vec<LawFragment> {
        let (Ok(row_sel), Ok(no_sel), Ok(data_sel)) = (
            Selector::parse("div.row"),
            Selector::parse("div.col-no"),
            Selector::parse("div.col-data"),
        ) else {
            return Vec::new();
        };

        let document = Html::parse_document(html);
        let mut fragments = Vec::new();

        for row in document.select(&row_sel) {
            let (Some(no), Some(data)) = (row.select(&no_sel).next(), row.select(&data_sel).next())
            else {
                continue;
            };

            let article_no = self.article_number(&no);
            let content = joined_text(&data);
            if article_no.is_empty() || content.is_empty() {
                continue;
            }
            if REPEALED_MARKERS.iter().any(|m| content.contains(m)) {
                tracing::debug!("Skipping repealed article {} {}", law_name, article_no);
                continue;
            }

            fragments.push(LawFragment::new(
                format!("{}_{}", pcode, article_no),
                format!("{} {}：{}", law_name, article_no, content),
                law_name,
            ));
        }

        fragments
    }

    /// 조번호 (내부 공백은 한 칸으로)
    fn article_number(&self, element: &ElementRef) -> String {
        let text: String = element.text().collect();
        self.whitespace.replace_all(text.trim(), " ").to_string()
    }
}

/// 텍스트 노드를 공백 없이 이어 붙임 (항/호가 줄로 나뉘어 있음)
fn joined_text(element: &ElementRef) -> String {
    element.text().map(str::trim).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
          <div class="law-reg-content">
            <div class="row">
              <div class="col-no"><a name="40">第 40 條</a></div>
              <div class="col-data">
                <div class="law-article">
                  <div class="line-0000">汽車駕駛人，行車速度，超過規定之最高時速，</div>
                  <div class="line-0000">處新臺幣一千二百元以上二千四百元以下罰鍰。</div>
                </div>
              </div>
            </div>
            <div class="row">
              <div class="col-no">第 41 條</div>
              <div class="col-data">（刪除）</div>
            </div>
            <div class="row">
              <div class="col-no">第   42 條</div>
              <div class="col-data">汽車駕駛人，不依規定使用燈光者，處新臺幣一千二百元以上三千六百元以下罰鍰。</div>
            </div>
            <div class="row"><div class="char-2">第 二 章 汽車</div></div>
          </div>
        </body></html>
    "#;

    #[test]
    fn test_parse_articles() {
        let scraper = LawScraper::new().unwrap();
        let fragments = scraper.parse_articles(PAGE, "K0040012", "道路交通管理處罰條例");

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].id, "K0040012_第 40 條");
        assert_eq!(
            fragments[0].text,
            "道路交通管理處罰條例 第 40 條：汽車駕駛人，行車速度，超過規定之最高時速，處新臺幣一千二百元以上二千四百元以下罰鍰。"
        );
        assert_eq!(fragments[0].category, "道路交通管理處罰條例");
        assert_eq!(fragments[1].id, "K0040012_第 42 條");
    }

    #[test]
    fn test_skips_repealed_articles() {
        let scraper = LawScraper::new().unwrap();
        let html = r#"<div class="row"><div class="col-no">第 5 條</div><div class="col-data">本條已廢止</div></div>"#;
        assert!(scraper.parse_articles(html, "B0000001", "民法").is_empty());
    }

    #[test]
    fn test_law_url() {
        let url = LawScraper::law_url("C0000001").unwrap();
        assert_eq!(
            url.as_str(),
            "https://law.moj.gov.tw/LawClass/LawAll.aspx?pcode=C0000001"
        );
    }

    #[test]
    fn test_default_targets() {
        assert_eq!(DEFAULT_TARGETS.len(), 3);
        assert!(DEFAULT_TARGETS.iter().any(|(p, _)| *p == "K0040012"));
    }
}
