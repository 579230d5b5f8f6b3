use url::Url;

use crate::error::WtResult;

pub(crate) fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://")
        || s.starts_with("https://")
        || s.starts_with("file://")
        || s.starts_with("ftp://")
}

/// Directory the manifest was published in: everything up to and including the
/// last `/` of the path. Query and fragment are dropped.
pub fn manifest_base_url(manifest_url: &Url) -> WtResult<Url> {
    let mut base = manifest_url.join("./")?;
    base.set_query(None);
    base.set_fragment(None);
    Ok(base)
}

pub(crate) fn merge_baseurls(current: &Url, new: &str) -> WtResult<Url> {
    if is_absolute_url(new) {
        Ok(Url::parse(new)?)
    } else {
        // The query of the base is carried over unless the new path brings its own.
        //
        // merge_baseurls(https://example.com/live/?auth=secret, seg-1.m4s) =>
        //   https://example.com/live/seg-1.m4s?auth=secret
        let mut merged = current.join(new)?;
        if merged.query().is_none() {
            merged.set_query(current.query());
        }
        Ok(merged)
    }
}
