//! Maps a room URL's host to the platform key used to look up
//! `PlatformOverrideConfig` and the rate limiter's bucket. Unknown hosts
//! fall back to the bare host string, so every room always resolves to
//! *some* platform key.

use url::Url;

const HOST_TABLE: &[(&str, &str)] = &[
    ("live.bilibili.com", "bilibili"),
    ("live.douyin.com", "douyin"),
    ("www.douyu.com", "douyu"),
    ("douyu.com", "douyu"),
    ("www.huya.com", "huya"),
    ("huya.com", "huya"),
    ("www.twitch.tv", "twitch"),
    ("twitch.tv", "twitch"),
    ("www.youtube.com", "youtube"),
    ("youtube.com", "youtube"),
    ("m.youtube.com", "youtube"),
    ("live.kuaishou.com", "kuaishou"),
    ("www.huajiao.com", "huajiao"),
    ("www.yizhibo.com", "yizhibo"),
    ("www.inke.cn", "inke"),
    ("panda.tv", "panda"),
    ("www.panda.tv", "panda"),
    ("www.zhanqi.tv", "zhanqi"),
    ("cc.163.com", "cc163"),
    ("star.longzhu.com", "longzhu"),
    ("www.longzhu.com", "longzhu"),
    ("afreecatv.com", "afreeca"),
    ("play.afreecatv.com", "afreeca"),
    ("www.nicovideo.jp", "nicolive"),
    ("live2.nicovideo.jp", "nicolive"),
    ("www.openrec.tv", "openrec"),
    ("openrec.tv", "openrec"),
    ("www.showroom-live.com", "showroom"),
    ("www.ttfun.com", "ttfun"),
];

/// Resolves a room URL's host into a platform key. Returns `None` only
/// when the URL itself fails to parse (caller should reject such a room
/// at config-verification time, not at resolve time).
pub fn platform_key_for_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    let key = HOST_TABLE
        .iter()
        .find(|(h, _)| *h == host)
        .map(|(_, k)| k.to_string())
        .unwrap_or_else(|| host.to_string());
    Some(key)
}
