//! Page-level PDF operations: splitting into ranges and merging sources.

use async_trait::async_trait;

use crate::db::JobType;
use crate::error::HandlerError;

use super::{HandlerContext, JobHandler, JobOutput, JobParams};

pub struct PdfSplitHandler;

#[async_trait]
impl JobHandler for PdfSplitHandler {
    fn job_type(&self) -> JobType {
        JobType::PdfSplit
    }

    async fn run(&self, ctx: &HandlerContext) -> Result<JobOutput, HandlerError> {
        let JobParams::PdfSplit(params) = &ctx.params else {
            return Err(HandlerError::Fatal(
                "pdf_split handler received mismatched params".to_string(),
            ));
        };

        let bytes = ctx.content_bytes()?;
        let doc = lopdf::Document::load_mem(&bytes)
            .map_err(|e| HandlerError::Fatal(format!("failed to load PDF: {e}")))?;
        let total_pages = doc.get_pages().len() as u32;

        for range in &params.ranges {
            if range.to > total_pages {
                return Err(HandlerError::Fatal(format!(
                    "page range {}..{} exceeds document page count {}",
                    range.from, range.to, total_pages
                )));
            }
        }

        let mut keys = Vec::with_capacity(params.ranges.len());
        let mut page_counts = Vec::with_capacity(params.ranges.len());
        for (index, range) in params.ranges.iter().enumerate() {
            ctx.check_cancelled()?;

            let mut part = doc.clone();
            let outside: Vec<u32> = (1..=total_pages)
                .filter(|page| *page < range.from || *page > range.to)
                .collect();
            if !outside.is_empty() {
                part.delete_pages(&outside);
            }

            let mut out = Vec::new();
            part.save_to(&mut out)
                .map_err(|e| HandlerError::Fatal(format!("failed to save split PDF: {e}")))?;

            let key = format!("{}/split-{}.pdf", ctx.document.id, index + 1);
            ctx.content.put(&key, &out)?;
            keys.push(key);
            page_counts.push(range.to - range.from + 1);
        }

        Ok(JobOutput::SplitPages { keys, page_counts })
    }
}

pub struct PdfMergeHandler;

#[async_trait]
impl JobHandler for PdfMergeHandler {
    fn job_type(&self) -> JobType {
        JobType::PdfMerge
    }

    async fn run(&self, ctx: &HandlerContext) -> Result<JobOutput, HandlerError> {
        let JobParams::PdfMerge(params) = &ctx.params else {
            return Err(HandlerError::Fatal(
                "pdf_merge handler received mismatched params".to_string(),
            ));
        };

        let mut sources = Vec::with_capacity(params.source_document_ids.len());
        for source_id in &params.source_document_ids {
            ctx.check_cancelled()?;
            let bytes = ctx.content.get(&HandlerContext::original_key(source_id))?;
            let doc = lopdf::Document::load_mem(&bytes).map_err(|e| {
                HandlerError::Fatal(format!("source {source_id} is not a loadable PDF: {e}"))
            })?;
            sources.push(doc);
        }

        let mut merged = merge_documents(sources)?;
        let page_count = merged.get_pages().len() as u32;

        let mut out = Vec::new();
        merged
            .save_to(&mut out)
            .map_err(|e| HandlerError::Fatal(format!("failed to save merged PDF: {e}")))?;
        let key = format!("{}/merged.pdf", ctx.document.id);
        ctx.content.put(&key, &out)?;

        Ok(JobOutput::MergedDocument { key, page_count })
    }
}

/// Renumber each source into a disjoint id space, then hang every page off a
/// fresh root page tree in source order.
fn merge_documents(sources: Vec<lopdf::Document>) -> Result<lopdf::Document, HandlerError> {
    use lopdf::{Document, Object, ObjectId, dictionary};

    let mut merged = Document::with_version("1.5");
    let mut next_id = 1u32;
    let mut page_ids: Vec<ObjectId> = Vec::new();

    for mut doc in sources {
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;
        page_ids.extend(doc.get_pages().into_values());

        // Source catalogs are dropped; the merged file gets a single root
        if let Ok(root_id) = doc.trailer.get(b"Root").and_then(Object::as_reference) {
            doc.objects.remove(&root_id);
        }
        merged.objects.extend(doc.objects);
    }

    if page_ids.is_empty() {
        return Err(HandlerError::Fatal("merge produced no pages".to_string()));
    }

    merged.max_id = next_id - 1;
    let kids: Vec<Object> = page_ids.iter().map(|id| Object::Reference(*id)).collect();
    let count = kids.len() as i64;
    let pages_id = merged.add_object(dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
    });

    for id in &page_ids {
        if let Ok(page) = merged.get_object_mut(*id).and_then(Object::as_dict_mut) {
            page.set("Parent", pages_id);
        }
    }

    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);

    Ok(merged)
}

#[cfg(test)]
pub(crate) mod test_support {
    use lopdf::{Document, Object, Stream, dictionary};

    /// Build a small PDF with one Courier text page per entry.
    pub(crate) fn sample_pdf_bytes(pages: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for text in pages {
            let content = format!("BT /F1 12 Tf 50 700 Td ({text}) Tj ET");
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => resources_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        doc.save_to(&mut bytes).unwrap();
        bytes
    }
}
